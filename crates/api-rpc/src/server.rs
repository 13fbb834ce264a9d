//! JSON-RPC Server
//!
//! Serves the queue API over TCP on localhost. Method names carry a `.v1`
//! suffix so later revisions can live side by side.

use crate::handler::RpcHandler;
use crate::types::SubscribeRequest;
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::Params;
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tasklane_core::application::QueueManager;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;

pub const SUBSCRIBE_METHOD: &str = "queue.events.subscribe.v1";
pub const NOTIFICATION_METHOD: &str = "queue.events.v1";
pub const UNSUBSCRIBE_METHOD: &str = "queue.events.unsubscribe.v1";

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, manager: Arc<QueueManager>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(manager)),
        }
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (useful with port 0) and the server handle.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = build_module(self.handler)?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started successfully");
        Ok((local_addr, handle))
    }
}

/// Register a request/response method that parses named params into the
/// handler's request type.
macro_rules! register_method {
    ($module:expr, $handler:expr, $name:literal, $method:ident) => {{
        let handler = Arc::clone(&$handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = Arc::clone(&handler);
                async move { handler.$method(params.parse()?).await }
            })
            .map_err(|e| e.to_string())?;
    }};
}

/// Build the RPC module with every method and the event subscription
pub fn build_module(handler: Arc<RpcHandler>) -> Result<RpcModule<()>, String> {
    let mut module = RpcModule::new(());

    // Queues
    register_method!(module, handler, "queue.create.v1", create_queue);
    register_method!(module, handler, "queue.get.v1", get_queue);
    register_method!(module, handler, "queue.activate.v1", activate_queue);
    register_method!(module, handler, "queue.deactivate.v1", deactivate_queue);
    register_method!(module, handler, "queue.complete.v1", complete_queue);
    register_method!(module, handler, "queue.execute.v1", execute_queue);
    register_method!(module, handler, "queue.delete.v1", delete_queue);

    let list_handler = Arc::clone(&handler);
    module
        .register_async_method("queue.list.v1", move |_, _, _| {
            let handler = Arc::clone(&list_handler);
            async move { handler.list_queues().await }
        })
        .map_err(|e| e.to_string())?;

    // Tasks
    register_method!(module, handler, "task.enqueue.v1", enqueue_task);
    register_method!(module, handler, "task.list.v1", list_tasks);
    register_method!(module, handler, "task.get.v1", get_task);
    register_method!(module, handler, "task.retry.v1", retry_task);
    register_method!(module, handler, "task.cancel.v1", cancel_task);

    // Events
    let sub_handler = Arc::clone(&handler);
    module
        .register_subscription(
            SUBSCRIBE_METHOD,
            NOTIFICATION_METHOD,
            UNSUBSCRIBE_METHOD,
            move |params, pending, _, _| {
                let handler = Arc::clone(&sub_handler);
                async move { pump_events(handler, params, pending).await }
            },
        )
        .map_err(|e| e.to_string())?;

    Ok(module)
}

/// Forward bus events to one subscriber until it disconnects
async fn pump_events(
    handler: Arc<RpcHandler>,
    params: Params<'static>,
    pending: PendingSubscriptionSink,
) -> SubscriptionResult {
    let filter = match params.parse::<Option<SubscribeRequest>>() {
        Ok(filter) => filter.unwrap_or_default(),
        Err(e) => {
            pending.reject(e).await;
            return Ok(());
        }
    };

    // Subscribe before accepting so nothing published in between is lost
    let mut events = handler.subscribe();
    let sink = pending.accept().await?;
    debug!(queue_id = ?filter.queue_id, "Event subscription opened");

    loop {
        tokio::select! {
            _ = sink.closed() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(queue_id) = &filter.queue_id {
                        if event.queue_id() != queue_id {
                            continue;
                        }
                    }
                    let message = SubscriptionMessage::from_json(&event)?;
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = %skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    debug!("Event subscription closed");
    Ok(())
}
