//! Tasklane Client Implementation

use crate::error::{Result, SdkError};
use crate::types::{
    CreateQueueRequest, DeleteQueueResponse, EnqueueTaskRequest, ExecuteQueueResponse,
    QueueEvent, QueueInfo, QueueListResponse, TaskInfo, TaskListResponse,
};
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Serialize;
use serde_json::value::RawValue;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends a serializable struct as by-name (object) params
struct Named<T>(T);

impl<T: Serialize> ToRpcParams for Named<T> {
    fn to_rpc_params(self) -> std::result::Result<Option<Box<RawValue>>, serde_json::Error> {
        serde_json::value::to_raw_value(&self.0).map(Some)
    }
}

#[derive(Serialize)]
struct QueueRef<'a> {
    queue_id: &'a str,
}

#[derive(Serialize)]
struct TaskRef<'a> {
    queue_id: &'a str,
    task_id: &'a str,
}

#[derive(Serialize)]
struct Enqueue<'a> {
    queue_id: &'a str,
    #[serde(flatten)]
    task: EnqueueTaskRequest,
}

#[derive(Serialize)]
struct EventFilter<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_id: Option<&'a str>,
}

/// Tasklane Engine Client
///
/// # Example
///
/// ```no_run
/// use tasklane_sdk::TasklaneClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = TasklaneClient::connect("http://127.0.0.1:9630").await?;
/// for queue in client.list_queues().await? {
///     println!("{} {:?} pending={}", queue.name, queue.status, queue.counts.pending);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TasklaneClient {
    client: HttpClient,
    url: String,
}

impl TasklaneClient {
    /// Connect to the Tasklane daemon
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9630`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();

        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    // Queues

    pub async fn create_queue(&self, request: CreateQueueRequest) -> Result<QueueInfo> {
        Ok(self
            .client
            .request("queue.create.v1", Named(request))
            .await?)
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>> {
        let response: QueueListResponse =
            self.client.request("queue.list.v1", rpc_params![]).await?;
        Ok(response.queues)
    }

    pub async fn get_queue(&self, queue_id: &str) -> Result<QueueInfo> {
        self.queue_call("queue.get.v1", queue_id).await
    }

    pub async fn activate_queue(&self, queue_id: &str) -> Result<QueueInfo> {
        self.queue_call("queue.activate.v1", queue_id).await
    }

    pub async fn deactivate_queue(&self, queue_id: &str) -> Result<QueueInfo> {
        self.queue_call("queue.deactivate.v1", queue_id).await
    }

    /// Mark a queue completed. Fails while it still has pending or processing tasks.
    pub async fn complete_queue(&self, queue_id: &str) -> Result<QueueInfo> {
        self.queue_call("queue.complete.v1", queue_id).await
    }

    /// Dispatch due tasks of a queue immediately instead of waiting for the next tick
    pub async fn execute_queue(&self, queue_id: &str) -> Result<ExecuteQueueResponse> {
        self.queue_call("queue.execute.v1", queue_id).await
    }

    /// Delete a queue together with all of its tasks
    pub async fn delete_queue(&self, queue_id: &str) -> Result<DeleteQueueResponse> {
        self.queue_call("queue.delete.v1", queue_id).await
    }

    // Tasks

    pub async fn enqueue_task(&self, queue_id: &str, task: EnqueueTaskRequest) -> Result<TaskInfo> {
        Ok(self
            .client
            .request("task.enqueue.v1", Named(Enqueue { queue_id, task }))
            .await?)
    }

    pub async fn list_tasks(&self, queue_id: &str) -> Result<Vec<TaskInfo>> {
        let response: TaskListResponse = self.queue_call("task.list.v1", queue_id).await?;
        Ok(response.tasks)
    }

    pub async fn get_task(&self, queue_id: &str, task_id: &str) -> Result<TaskInfo> {
        self.task_call("task.get.v1", queue_id, task_id).await
    }

    pub async fn retry_task(&self, queue_id: &str, task_id: &str) -> Result<TaskInfo> {
        self.task_call("task.retry.v1", queue_id, task_id).await
    }

    pub async fn cancel_task(&self, queue_id: &str, task_id: &str) -> Result<TaskInfo> {
        self.task_call("task.cancel.v1", queue_id, task_id).await
    }

    // Events

    /// Open a WebSocket subscription to queue and task change events,
    /// optionally restricted to one queue.
    pub async fn subscribe_events(&self, queue_id: Option<&str>) -> Result<EventSubscription> {
        let ws_url = websocket_url(&self.url);
        let client = WsClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(&ws_url)
            .await
            .map_err(|e| SdkError::Connection(format!("Failed to open {}: {}", ws_url, e)))?;

        let inner = client
            .subscribe(
                "queue.events.subscribe.v1",
                Named(EventFilter { queue_id }),
                "queue.events.unsubscribe.v1",
            )
            .await?;

        Ok(EventSubscription {
            inner,
            _client: client,
        })
    }

    async fn queue_call<R>(&self, method: &str, queue_id: &str) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        Ok(self
            .client
            .request(method, Named(QueueRef { queue_id }))
            .await?)
    }

    async fn task_call<R>(&self, method: &str, queue_id: &str, task_id: &str) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        Ok(self
            .client
            .request(method, Named(TaskRef { queue_id, task_id }))
            .await?)
    }
}

/// Live event stream. Dropping it unsubscribes.
pub struct EventSubscription {
    inner: Subscription<QueueEvent>,
    _client: WsClient,
}

impl EventSubscription {
    /// Next event, or `None` once the daemon closes the stream
    pub async fn next(&mut self) -> Option<Result<QueueEvent>> {
        self.inner
            .next()
            .await
            .map(|event| event.map_err(SdkError::from))
    }
}

fn websocket_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("http://127.0.0.1:9630"), "ws://127.0.0.1:9630");
        assert_eq!(websocket_url("https://tasks.local"), "wss://tasks.local");
        assert_eq!(websocket_url("ws://127.0.0.1:9630"), "ws://127.0.0.1:9630");
    }

    #[test]
    fn test_named_params_are_an_object() {
        let raw = Named(TaskRef {
            queue_id: "q-1",
            task_id: "t-1",
        })
        .to_rpc_params()
        .unwrap()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.get()).unwrap();
        assert_eq!(value, serde_json::json!({"queue_id": "q-1", "task_id": "t-1"}));
    }

    #[test]
    fn test_enqueue_params_are_flat() {
        let raw = Named(Enqueue {
            queue_id: "q-1",
            task: EnqueueTaskRequest::new("digest").with_priority(3),
        })
        .to_rpc_params()
        .unwrap()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.get()).unwrap();
        assert_eq!(value["queue_id"], "q-1");
        assert_eq!(value["title"], "digest");
        assert_eq!(value["priority"], 3);
    }
}
