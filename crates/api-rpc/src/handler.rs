//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC parameters to QueueManager calls.

use crate::error::to_rpc_error;
use crate::types::{
    CreateQueueRequest, DeleteQueueResponse, EnqueueTaskRequest, ExecuteQueueResponse,
    QueueListResponse, QueueRequest, TaskListResponse, TaskRequest,
};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tasklane_core::application::{QueueEvent, QueueManager};
use tasklane_core::domain::{QueueSummary, QueuedTask};
use tokio::sync::broadcast;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    manager: Arc<QueueManager>,
}

impl RpcHandler {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }

    /// queue.create.v1
    pub async fn create_queue(&self, params: CreateQueueRequest) -> RpcResult<QueueSummary> {
        self.manager
            .create_queue(params.config, params.is_active)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.list.v1
    pub async fn list_queues(&self) -> RpcResult<QueueListResponse> {
        let queues = self.manager.list_queues().await.map_err(to_rpc_error)?;
        Ok(QueueListResponse { queues })
    }

    /// queue.get.v1
    pub async fn get_queue(&self, params: QueueRequest) -> RpcResult<QueueSummary> {
        self.manager
            .get_queue(&params.queue_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.activate.v1
    pub async fn activate_queue(&self, params: QueueRequest) -> RpcResult<QueueSummary> {
        self.manager
            .activate_queue(&params.queue_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.deactivate.v1
    pub async fn deactivate_queue(&self, params: QueueRequest) -> RpcResult<QueueSummary> {
        self.manager
            .deactivate_queue(&params.queue_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.complete.v1
    pub async fn complete_queue(&self, params: QueueRequest) -> RpcResult<QueueSummary> {
        self.manager
            .complete_queue(&params.queue_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.execute.v1
    pub async fn execute_queue(&self, params: QueueRequest) -> RpcResult<ExecuteQueueResponse> {
        let dispatched = self
            .manager
            .execute_queue_now(&params.queue_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(ExecuteQueueResponse {
            queue_id: params.queue_id,
            dispatched,
        })
    }

    /// queue.delete.v1
    pub async fn delete_queue(&self, params: QueueRequest) -> RpcResult<DeleteQueueResponse> {
        let tasks_removed = self
            .manager
            .delete_queue(&params.queue_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(DeleteQueueResponse {
            queue_id: params.queue_id,
            deleted: true,
            tasks_removed,
        })
    }

    /// task.enqueue.v1
    pub async fn enqueue_task(&self, params: EnqueueTaskRequest) -> RpcResult<QueuedTask> {
        self.manager
            .enqueue_task(&params.queue_id, params.task)
            .await
            .map_err(to_rpc_error)
    }

    /// task.list.v1
    pub async fn list_tasks(&self, params: QueueRequest) -> RpcResult<TaskListResponse> {
        let tasks = self
            .manager
            .list_tasks(&params.queue_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(TaskListResponse {
            queue_id: params.queue_id,
            tasks,
        })
    }

    /// task.get.v1
    pub async fn get_task(&self, params: TaskRequest) -> RpcResult<QueuedTask> {
        self.manager
            .get_task(&params.queue_id, &params.task_id)
            .await
            .map_err(to_rpc_error)
    }

    /// task.retry.v1
    pub async fn retry_task(&self, params: TaskRequest) -> RpcResult<QueuedTask> {
        self.manager
            .retry_task(&params.queue_id, &params.task_id)
            .await
            .map_err(to_rpc_error)
    }

    /// task.cancel.v1
    pub async fn cancel_task(&self, params: TaskRequest) -> RpcResult<QueuedTask> {
        self.manager
            .cancel_task(&params.queue_id, &params.task_id)
            .await
            .map_err(to_rpc_error)
    }

    /// queue.events.subscribe.v1
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.manager.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use tasklane_core::application::EngineConfig;
    use tasklane_core::domain::{QueueConfig, TaskStatus};
    use tasklane_core::port::id_provider::UuidProvider;
    use tasklane_core::port::task_executor::mocks::MockTaskExecutor;
    use tasklane_core::port::time_provider::SystemTimeProvider;
    use tasklane_infra_sqlite::{
        create_pool, run_migrations, SqliteQueueRepository, SqliteTaskRepository,
    };

    async fn setup_handler() -> RpcHandler {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let manager = QueueManager::new(
            Arc::new(SqliteQueueRepository::new(pool.clone())),
            Arc::new(SqliteTaskRepository::new(pool)),
            Arc::new(MockTaskExecutor::new_success()),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
            EngineConfig::default(),
        );
        RpcHandler::new(Arc::new(manager))
    }

    fn create_request(name: &str) -> CreateQueueRequest {
        CreateQueueRequest {
            config: QueueConfig::new(name, 2),
            is_active: false,
        }
    }

    #[tokio::test]
    async fn test_create_then_get_queue() {
        let handler = setup_handler().await;
        let created = handler.create_queue(create_request("emails")).await.unwrap();

        let fetched = handler
            .get_queue(QueueRequest {
                queue_id: created.queue.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(fetched.queue.config, created.queue.config);
        assert_eq!(fetched.queue.status(), tasklane_core::domain::QueueStatus::Paused);
    }

    #[tokio::test]
    async fn test_invalid_cron_maps_to_config_code() {
        let handler = setup_handler().await;
        let mut req = create_request("reports");
        req.config.cron_expression = Some("whenever".to_string());

        let err = handler.create_queue(req).await.unwrap_err();
        assert_eq!(err.code(), code::CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_queue_maps_to_not_found() {
        let handler = setup_handler().await;
        let err = handler
            .activate_queue(QueueRequest {
                queue_id: "missing".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_twice_maps_to_invalid_state() {
        let handler = setup_handler().await;
        let queue = handler.create_queue(create_request("emails")).await.unwrap();
        let task = handler
            .enqueue_task(EnqueueTaskRequest {
                queue_id: queue.queue.id.clone(),
                task: tasklane_core::domain::NewTask::new("welcome mail"),
            })
            .await
            .unwrap();

        let request = || TaskRequest {
            queue_id: queue.queue.id.clone(),
            task_id: task.id.clone(),
        };
        let cancelled = handler.cancel_task(request()).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let err = handler.cancel_task(request()).await.unwrap_err();
        assert_eq!(err.code(), code::INVALID_STATE);
    }

    #[tokio::test]
    async fn test_list_tasks_of_unknown_queue_is_empty() {
        let handler = setup_handler().await;
        let response = handler
            .list_tasks(QueueRequest {
                queue_id: "missing".to_string(),
            })
            .await
            .unwrap();
        assert!(response.tasks.is_empty());
    }
}
