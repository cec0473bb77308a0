use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::broker::QueueName;

/// One async mutex per queue name, created on first use. Used to serialize the
/// read-offset -> fetch -> commit sequence when several consumers share a queue.
#[derive(Default)]
pub struct QueueLocks {
    locks: DashMap<QueueName, Arc<Mutex<()>>>,
}

impl QueueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, queue: &QueueName) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self.locks.entry(queue.clone()).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_queue_is_exclusive() {
        let locks = QueueLocks::new();
        let orders = QueueName::from("orders");

        let guard = locks.lock(&orders).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(&orders)).await;
        assert!(second.is_err(), "second lock should wait for the first");

        drop(guard);
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(&orders)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn queues_do_not_block_each_other() {
        let locks = QueueLocks::new();
        let _orders = locks.lock(&"orders".into()).await;
        let payments =
            tokio::time::timeout(Duration::from_millis(50), locks.lock(&"payments".into())).await;
        assert!(payments.is_ok());
    }
}
