//! Live queue and failure store, guarded by a single lock.
//!
//! Both collections and the in-flight table live behind one `RwLock` so that
//! every transition (enqueue, delivered, failed, manual retry) is atomic and
//! every snapshot is consistent. Once the shutdown token is cancelled, all
//! transitions become no-ops and the collections are frozen.

use std::collections::HashSet;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::message::{Message, MessageStatus};
use crate::metrics::OutboxMetrics;

use super::models::{QueuedMessage, QueueStatus};

#[derive(Default)]
struct StoreInner {
    /// Messages awaiting delivery, in insertion order
    queued: Vec<QueuedMessage>,
    /// Messages that exhausted their retries, in order of failure
    failed: Vec<QueuedMessage>,
    /// Ids with a running delivery cycle
    in_flight: HashSet<String>,
}

impl StoreInner {
    fn contains(&self, id: &str) -> bool {
        self.in_flight.contains(id)
            || self.queued.iter().any(|m| m.id() == id)
            || self.failed.iter().any(|m| m.id() == id)
    }

    fn queued_mut(&mut self, id: &str) -> Option<&mut QueuedMessage> {
        self.queued.iter_mut().find(|m| m.id() == id)
    }

    fn take_queued(&mut self, id: &str) -> Option<QueuedMessage> {
        let index = self.queued.iter().position(|m| m.id() == id)?;
        Some(self.queued.remove(index))
    }

    fn take_failed(&mut self, id: &str) -> Option<QueuedMessage> {
        let index = self.failed.iter().position(|m| m.id() == id)?;
        Some(self.failed.remove(index))
    }
}

pub(crate) struct MessageStore {
    inner: RwLock<StoreInner>,
    shutdown: CancellationToken,
}

impl MessageStore {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            shutdown,
        }
    }

    fn is_sealed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Insert a new entry and claim its in-flight slot.
    ///
    /// Returns the cycle's cancellation token, or `None` if the id is already
    /// known or the store is sealed.
    pub async fn insert(&self, entry: QueuedMessage) -> Option<CancellationToken> {
        let mut inner = self.inner.write().await;
        if self.is_sealed() || inner.contains(entry.id()) {
            return None;
        }

        inner.in_flight.insert(entry.id().to_string());
        inner.queued.push(entry);
        OutboxMetrics::adjust_sizes(1, 0);
        Some(self.shutdown.child_token())
    }

    /// Move a failed entry back into the queue for a manual retry and claim its slot.
    ///
    /// Fails with `InFlight` while the cycle that parked the entry is still
    /// reporting the failure remotely.
    pub async fn requeue_failed(&self, id: &str) -> Result<CancellationToken, QueueError> {
        let mut inner = self.inner.write().await;
        if self.is_sealed() {
            return Err(QueueError::Disposed);
        }
        if !inner.failed.iter().any(|m| m.id() == id) {
            return Err(QueueError::NotFound(id.to_string()));
        }
        if inner.in_flight.contains(id) {
            return Err(QueueError::InFlight(id.to_string()));
        }

        let mut entry = inner
            .take_failed(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        entry.failed_at = None;
        entry.message.status = MessageStatus::Sending;

        inner.in_flight.insert(id.to_string());
        inner.queued.push(entry);
        OutboxMetrics::adjust_sizes(1, -1);
        Ok(self.shutdown.child_token())
    }

    /// Message to send on the next attempt, if the entry is still queued
    pub async fn pending_message(&self, id: &str) -> Option<Message> {
        let inner = self.inner.read().await;
        if self.is_sealed() {
            return None;
        }
        inner
            .queued
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.message.clone())
    }

    /// Remove a delivered entry and release its slot.
    pub async fn mark_delivered(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if self.is_sealed() {
            return false;
        }

        let removed = inner.take_queued(id).is_some();
        inner.in_flight.remove(id);
        if removed {
            OutboxMetrics::adjust_sizes(-1, 0);
        }
        removed
    }

    /// Count a failed attempt. Returns the new attempt count.
    pub async fn record_failure(&self, id: &str, error: String) -> Option<u32> {
        let mut inner = self.inner.write().await;
        if self.is_sealed() {
            return None;
        }

        let entry = inner.queued_mut(id)?;
        entry.attempts += 1;
        entry.last_error = Some(error);
        Some(entry.attempts)
    }

    /// Move an exhausted entry to the failure store.
    ///
    /// The slot stays claimed until the cycle calls `release`, so a manual
    /// retry cannot start while the failure is still being reported.
    pub async fn mark_failed(&self, id: &str) -> Option<QueuedMessage> {
        let mut inner = self.inner.write().await;
        if self.is_sealed() {
            return None;
        }

        let mut entry = inner.take_queued(id)?;
        entry.failed_at = Some(Utc::now());
        entry.message.status = MessageStatus::Failed;
        inner.failed.push(entry.clone());
        OutboxMetrics::adjust_sizes(-1, 1);
        Some(entry)
    }

    /// Release a slot without any transition (cycle finished, cancelled or abandoned).
    ///
    /// Allowed after sealing, so that idle waits can complete.
    pub async fn release(&self, id: &str) {
        self.inner.write().await.in_flight.remove(id);
    }

    pub async fn remove_failed(&self, id: &str) -> Result<QueuedMessage, QueueError> {
        let mut inner = self.inner.write().await;
        if self.is_sealed() {
            return Err(QueueError::Disposed);
        }

        let entry = inner
            .take_failed(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        OutboxMetrics::adjust_sizes(0, -1);
        Ok(entry)
    }

    pub async fn clear_failed(&self) -> Result<usize, QueueError> {
        let mut inner = self.inner.write().await;
        if self.is_sealed() {
            return Err(QueueError::Disposed);
        }

        let cleared = inner.failed.len();
        inner.failed.clear();
        OutboxMetrics::adjust_sizes(0, -(cleared as i64));
        Ok(cleared)
    }

    pub async fn failed_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.failed.iter().map(|m| m.id().to_string()).collect()
    }

    pub async fn queued(&self) -> Vec<QueuedMessage> {
        self.inner.read().await.queued.clone()
    }

    pub async fn failed(&self) -> Vec<QueuedMessage> {
        self.inner.read().await.failed.clone()
    }

    pub async fn status(&self) -> QueueStatus {
        let inner = self.inner.read().await;
        QueueStatus::new(inner.queued.len(), inner.failed.len())
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inner.read().await.in_flight.len()
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        // Gauges are shared by every store in the process
        let inner = self.inner.get_mut();
        OutboxMetrics::adjust_sizes(-(inner.queued.len() as i64), -(inner.failed.len() as i64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> QueuedMessage {
        QueuedMessage::new(Message::builder("chat-1", "user-1").id(id).content("hi").build())
    }

    #[tokio::test]
    async fn test_insert_rejects_known_ids() {
        let store = MessageStore::new(CancellationToken::new());

        assert!(store.insert(entry("msg_1")).await.is_some());
        assert!(store.insert(entry("msg_1")).await.is_none());

        // Still rejected once parked in the failure store
        store.record_failure("msg_1", "boom".to_string()).await;
        store.mark_failed("msg_1").await.unwrap();
        assert!(store.insert(entry("msg_1")).await.is_none());

        let status = store.status().await;
        assert_eq!(status.queued_count, 0);
        assert_eq!(status.failed_count, 1);
    }

    #[tokio::test]
    async fn test_failure_then_delivery() {
        let store = MessageStore::new(CancellationToken::new());
        store.insert(entry("msg_1")).await.unwrap();

        assert_eq!(store.record_failure("msg_1", "timeout".to_string()).await, Some(1));
        assert_eq!(store.record_failure("msg_1", "reset".to_string()).await, Some(2));

        let queued = store.queued().await;
        assert_eq!(queued[0].attempts, 2);
        assert_eq!(queued[0].last_error.as_deref(), Some("reset"));

        assert!(store.mark_delivered("msg_1").await);
        assert_eq!(store.in_flight_count().await, 0);
        assert_eq!(store.status().await, QueueStatus::default());
    }

    #[tokio::test]
    async fn test_mark_failed_moves_entry() {
        let store = MessageStore::new(CancellationToken::new());
        store.insert(entry("msg_1")).await.unwrap();
        store.record_failure("msg_1", "boom".to_string()).await;

        let failed = store.mark_failed("msg_1").await.unwrap();
        assert!(failed.failed_at.is_some());
        assert_eq!(failed.message.status, MessageStatus::Failed);
        assert!(store.queued().await.is_empty());
        assert_eq!(store.failed_ids().await, vec!["msg_1".to_string()]);

        // Slot stays held until the cycle finishes reporting the failure
        assert_eq!(store.in_flight_count().await, 1);
        assert_eq!(
            store.requeue_failed("msg_1").await.unwrap_err(),
            QueueError::InFlight("msg_1".to_string())
        );
        assert_eq!(store.failed().await.len(), 1);

        store.release("msg_1").await;
        assert_eq!(store.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_requeue_failed_keeps_attempts() {
        let store = MessageStore::new(CancellationToken::new());
        store.insert(entry("msg_1")).await.unwrap();
        store.record_failure("msg_1", "boom".to_string()).await;
        store.mark_failed("msg_1").await.unwrap();
        store.release("msg_1").await;

        store.requeue_failed("msg_1").await.unwrap();

        let queued = store.queued().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].attempts, 1);
        assert!(queued[0].failed_at.is_none());
        assert_eq!(queued[0].message.status, MessageStatus::Sending);
        assert!(store.failed().await.is_empty());

        assert_eq!(
            store.requeue_failed("msg_1").await.unwrap_err(),
            QueueError::NotFound("msg_1".to_string())
        );
    }

    #[tokio::test]
    async fn test_sealed_store_is_frozen() {
        let shutdown = CancellationToken::new();
        let store = MessageStore::new(shutdown.clone());
        let token = store.insert(entry("msg_1")).await.unwrap();

        shutdown.cancel();
        assert!(token.is_cancelled());

        assert!(store.insert(entry("msg_2")).await.is_none());
        assert!(store.record_failure("msg_1", "boom".to_string()).await.is_none());
        assert!(!store.mark_delivered("msg_1").await);
        assert!(store.mark_failed("msg_1").await.is_none());
        assert_eq!(store.clear_failed().await.unwrap_err(), QueueError::Disposed);

        // Snapshots stay readable
        assert_eq!(store.queued().await.len(), 1);

        store.release("msg_1").await;
        assert_eq!(store.in_flight_count().await, 0);
    }
}
