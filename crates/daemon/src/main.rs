//! Tasklane daemon - composition root
//!
//! Wires SQLite storage, the subprocess executor and the queue manager,
//! then serves JSON-RPC until Ctrl+C.

mod logging;
mod settings;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use settings::DaemonConfig;
use tasklane_api_rpc::{RpcServer, RpcServerConfig};
use tasklane_core::application::constants::SHUTDOWN_DRAIN_TIMEOUT;
use tasklane_core::application::{shutdown_channel, QueueManager, RecoveryService};
use tasklane_core::port::id_provider::UuidProvider;
use tasklane_core::port::time_provider::SystemTimeProvider;
use tasklane_infra_sqlite::{
    create_pool, run_migrations, SqliteQueueRepository, SqliteTaskRepository,
};
use tasklane_infra_system::SubprocessExecutor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::load()?;
    let _log_guard = logging::init(&config)?;

    info!("Tasklane daemon v{} starting...", VERSION);

    // 2. Database
    let db_file = config.db_file();
    if let Some(parent) = db_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    info!(db_path = %db_file.display(), "Initializing database...");

    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let queue_repo = Arc::new(SqliteQueueRepository::new(pool.clone()));
    let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
    let executor = Arc::new(SubprocessExecutor::new(
        time_provider.clone(),
        config.env_allowlist.clone(),
    ));

    // 4. Crash recovery: tasks left in processing by a previous run
    let recovery = RecoveryService::new(task_repo.clone(), time_provider.clone());
    match recovery.recover_orphaned_tasks().await {
        Ok(count) => info!(recovered_tasks = count, "Crash recovery completed"),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    let manager = Arc::new(QueueManager::new(
        queue_repo,
        task_repo,
        executor,
        Arc::new(UuidProvider),
        time_provider,
        config.engine.clone(),
    ));

    // 5. Scheduler loop
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let scheduler = manager.scheduler();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // 6. JSON-RPC server
    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, Arc::clone(&manager))
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(rpc_addr = %rpc_addr, "System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: stop admitting work, then drain running tasks
    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task failed");
    }

    let dispatcher = manager.dispatcher();
    let in_flight = dispatcher.in_flight();
    if in_flight > 0 {
        info!(in_flight = in_flight, "Waiting for running tasks to finish...");
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, dispatcher.wait_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = dispatcher.in_flight(),
                "Drain timeout elapsed; remaining tasks will be recovered on next start"
            );
        }
    }

    pool.close().await;
    info!("Shutdown complete.");

    Ok(())
}
