// Per-queue worker pools

use crate::domain::QueueId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Lazily created semaphore per queue, sized to the queue's concurrency
#[derive(Default)]
pub struct WorkerPools {
    pools: Mutex<HashMap<QueueId, Arc<Semaphore>>>,
}

impl WorkerPools {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, queue_id: &QueueId, concurrency: u32) -> Arc<Semaphore> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(queue_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(concurrency.max(1) as usize)))
            .clone()
    }

    /// Wait for a worker slot. Returns None once the pool is torn down.
    pub async fn acquire(
        &self,
        queue_id: &QueueId,
        concurrency: u32,
    ) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.get_or_create(queue_id, concurrency);
        semaphore.acquire_owned().await.ok()
    }

    /// Close and forget the queue's pool; pending acquisitions fail
    pub fn remove(&self, queue_id: &QueueId) -> bool {
        let removed = self
            .pools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(queue_id);
        match removed {
            Some(semaphore) => {
                semaphore.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pools.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
