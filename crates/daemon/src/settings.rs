//! Daemon configuration
//!
//! Layered: built-in defaults, then an optional TOML file
//! (`TASKLANE_CONFIG`, default `~/.tasklane/config.toml`), then
//! `TASKLANE_*` environment variables. Nested keys use `__`, e.g.
//! `TASKLANE_ENGINE__TICK_INTERVAL_MS=500`.

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use tasklane_core::application::EngineConfig;

const DEFAULT_CONFIG_PATH: &str = "~/.tasklane/config.toml";
const DEFAULT_DB_PATH: &str = "~/.tasklane/tasklane.db";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,
    /// Also write daily-rotated log files here when set
    pub log_dir: Option<String>,
    /// Environment variables passed through to task subprocesses
    pub env_allowlist: Vec<String>,
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            rpc_host: DEFAULT_RPC_HOST.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_format: LogFormat::Pretty,
            log_dir: None,
            env_allowlist: ["PATH", "HOME", "USER", "LANG"]
                .into_iter()
                .map(String::from)
                .collect(),
            engine: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("TASKLANE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = shellexpand::tilde(&path).into_owned();

        let builder = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("TASKLANE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::from_builder(builder)
            .with_context(|| format!("Failed to load configuration (file: {})", path))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: DaemonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            bail!("db_path cannot be empty");
        }
        self.engine
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid engine configuration: {}", e))
    }

    /// Database file path with `~` expanded
    pub fn db_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_file().display())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<DaemonConfig> {
        DaemonConfig::from_builder(
            Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.env_allowlist.contains(&"PATH".to_string()));
    }

    #[test]
    fn test_nested_engine_section() {
        let config = from_toml(
            r#"
            rpc_port = 9700
            log_format = "json"

            [engine]
            tick_interval_ms = 250
            global_concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc_port, 9700);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.engine.tick_interval_ms, 250);
        assert_eq!(config.engine.global_concurrency, Some(8));
    }

    #[test]
    fn test_invalid_engine_rejected() {
        let err = from_toml("[engine]\ntick_interval_ms = 0").unwrap_err();
        assert!(err.to_string().contains("tick_interval_ms"));
    }

    #[test]
    fn test_database_url_expands_tilde() {
        let config = DaemonConfig {
            db_path: "/var/lib/tasklane/db.sqlite".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.database_url(),
            "sqlite:///var/lib/tasklane/db.sqlite?mode=rwc"
        );
    }
}
