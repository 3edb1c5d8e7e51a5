use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::QueueSettings;
use crate::delivery::Deliverer;
use crate::error::{QueueError, Result};
use crate::message::Message;
use crate::metrics::OutboxMetrics;

use super::models::{QueueStatus, QueuedMessage, RetryReport};
use super::retry::RetryPolicy;
use super::scheduler::QueueScheduler;
use super::store::MessageStore;

/// Default upper bound for a single send call
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval used while waiting for delivery cycles to settle
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outbound message queue for a chat session.
///
/// Accepts messages without waiting for the network, sends each one on its
/// own task, retries transient failures with backoff, and parks messages that
/// exhaust their retries in a failure store until the caller retries or
/// discards them.
///
/// # Design
///
/// - One instance per session, constructed with its `Deliverer` and shared as `Arc`
/// - The queue, the failure store, and the in-flight table share one lock
/// - Every cycle holds a child of the service's cancellation token
/// - `dispose()` (or dropping the service) cancels all cycles and freezes the stores
///
/// # Example
///
/// ```rust,ignore
/// let outbox = MessageQueueService::new(Arc::new(MemoryDeliverer::new()));
///
/// outbox.enqueue(Message::text("chat-1", "user-1", "hi")).await;
///
/// for failed in outbox.failed_messages().await {
///     outbox.retry_message(failed.id()).await?;
/// }
/// ```
pub struct MessageQueueService {
    store: Arc<MessageStore>,
    scheduler: Arc<QueueScheduler>,
    shutdown: CancellationToken,
}

impl MessageQueueService {
    /// Create a service with the default retry policy
    pub fn new(deliverer: Arc<dyn Deliverer>) -> Self {
        Self::with_policy(deliverer, RetryPolicy::default())
    }

    /// Create a service with a custom retry policy
    pub fn with_policy(deliverer: Arc<dyn Deliverer>, policy: RetryPolicy) -> Self {
        Self::with_config(deliverer, policy, DEFAULT_SEND_TIMEOUT)
    }

    /// Create a service from queue settings
    pub fn from_settings(deliverer: Arc<dyn Deliverer>, settings: &QueueSettings) -> Self {
        Self::with_config(
            deliverer,
            RetryPolicy::from(settings),
            Duration::from_millis(settings.send_timeout_ms),
        )
    }

    /// Create a service with a custom retry policy and send timeout
    pub fn with_config(
        deliverer: Arc<dyn Deliverer>,
        policy: RetryPolicy,
        send_timeout: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let store = Arc::new(MessageStore::new(shutdown.clone()));
        let scheduler = Arc::new(QueueScheduler::new(
            deliverer,
            policy,
            store.clone(),
            send_timeout,
        ));

        tracing::debug!(
            max_attempts = scheduler.policy().max_attempts,
            send_timeout_ms = send_timeout.as_millis() as u64,
            "Message queue service created"
        );

        Self {
            store,
            scheduler,
            shutdown,
        }
    }

    /// Queue a message and start delivering it in the background.
    ///
    /// Returns immediately. Returns `false` if a message with the same id is
    /// already queued or failed, or if the service has been disposed; in both
    /// cases nothing changes.
    #[tracing::instrument(
        name = "outbox.enqueue",
        skip(self, message),
        fields(message_id = %message.id, chat_id = %message.chat_id)
    )]
    pub async fn enqueue(&self, message: Message) -> bool {
        if self.is_disposed() {
            tracing::warn!("Service disposed, message ignored");
            return false;
        }

        let message_id = message.id.clone();
        match self.store.insert(QueuedMessage::new(message)).await {
            Some(token) => {
                OutboxMetrics::record_enqueued();
                tracing::debug!("Message enqueued");
                self.scheduler.spawn_cycle(message_id, token, None);
                true
            }
            None => {
                OutboxMetrics::record_duplicate();
                tracing::debug!("Message already in the outbox, enqueue ignored");
                false
            }
        }
    }

    /// Snapshot of messages awaiting delivery, in insertion order
    pub async fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.store.queued().await
    }

    /// Snapshot of messages that exhausted their retries, in order of failure
    pub async fn failed_messages(&self) -> Vec<QueuedMessage> {
        self.store.failed().await
    }

    /// Retry a failed message and wait for the outcome of its first re-attempt.
    ///
    /// The attempt counter is not reset. The first re-attempt is always made;
    /// if it fails, automatic retries continue only while the retry policy
    /// allows the lifetime attempt count, and the message returns to the
    /// failure store once it does not.
    ///
    /// Fails with `InFlight` if the message was parked moments ago and its
    /// failure is still being reported to the deliverer.
    #[tracing::instrument(name = "outbox.retry_message", skip(self))]
    pub async fn retry_message(&self, message_id: &str) -> Result<Message> {
        let token = self.store.requeue_failed(message_id).await?;
        OutboxMetrics::record_manual_retry();
        tracing::info!("Manual retry started");

        let (tx, rx) = oneshot::channel();
        self.scheduler
            .spawn_cycle(message_id.to_string(), token, Some(tx));

        match rx.await {
            Ok(outcome) => outcome.map_err(QueueError::from),
            Err(_) => Err(QueueError::Cancelled(message_id.to_string())),
        }
    }

    /// Retry every failed message concurrently.
    ///
    /// Individual failures do not abort the others and are not an error; they
    /// are listed in the report. Fails only if the service is disposed.
    #[tracing::instrument(name = "outbox.retry_all", skip(self))]
    pub async fn retry_all_failed_messages(&self) -> Result<RetryReport> {
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }

        let ids = self.store.failed_ids().await;
        let outcomes = join_all(ids.iter().map(|id| self.retry_message(id))).await;

        let mut report = RetryReport::default();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => report.succeeded.push(id),
                // Removed by the caller while the batch was starting
                Err(QueueError::NotFound(_)) => {}
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Retried failed messages"
        );

        Ok(report)
    }

    /// Discard a failed message without retrying it
    #[tracing::instrument(name = "outbox.remove_failed", skip(self))]
    pub async fn remove_failed_message(&self, message_id: &str) -> Result<()> {
        self.store.remove_failed(message_id).await?;
        tracing::info!("Failed message discarded");
        Ok(())
    }

    /// Discard every failed message
    pub async fn clear_failed_messages(&self) -> Result<()> {
        let cleared = self.store.clear_failed().await?;
        tracing::info!(cleared = cleared, "Failure store cleared");
        Ok(())
    }

    /// Point-in-time counts of both collections
    pub async fn queue_status(&self) -> QueueStatus {
        self.store.status().await
    }

    /// Cancel every pending send and retry wait, and freeze both collections.
    ///
    /// Idempotent. Snapshots stay readable afterwards; no further `Deliverer`
    /// calls are started.
    pub fn dispose(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        tracing::info!("Message queue service disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until no delivery cycle is running.
    ///
    /// Returns `false` if cycles were still running when `max_wait` elapsed.
    pub async fn wait_idle(&self, max_wait: Duration) -> bool {
        let store = self.store.clone();
        let wait = async move {
            while store.in_flight_count().await > 0 {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };

        timeout(max_wait, wait).await.is_ok()
    }

    /// Number of delivery cycles currently running
    pub async fn in_flight_count(&self) -> usize {
        self.store.in_flight_count().await
    }
}

impl Drop for MessageQueueService {
    fn drop(&mut self) {
        // Running cycles only hold the scheduler, so stop them with the service
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MemoryDeliverer;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_enqueue_delivers_through_memory_deliverer() {
        let deliverer = Arc::new(MemoryDeliverer::new());
        let service = MessageQueueService::with_policy(deliverer.clone(), fast_policy());

        let message = Message::builder("chat-1", "user-1").id("msg_1").content("hi").build();
        assert!(service.enqueue(message).await);
        assert!(service.wait_idle(Duration::from_secs(1)).await);

        assert_eq!(service.queue_status().await, QueueStatus::default());
        assert!(deliverer.get("msg_1").is_some());
        assert_eq!(deliverer.chat_summary("chat-1").unwrap().last_message_id, "msg_1");
    }

    #[tokio::test]
    async fn test_enqueue_after_dispose_is_ignored() {
        let service = MessageQueueService::new(Arc::new(MemoryDeliverer::new()));
        service.dispose();
        service.dispose();

        assert!(service.is_disposed());
        assert!(!service.enqueue(Message::text("chat-1", "user-1", "hi")).await);
        assert_eq!(service.queue_status().await.total_count, 0);
        assert_eq!(
            service.retry_all_failed_messages().await.unwrap_err(),
            QueueError::Disposed
        );
    }

    #[tokio::test]
    async fn test_retry_unknown_message_is_not_found() {
        let service = MessageQueueService::new(Arc::new(MemoryDeliverer::new()));

        assert_eq!(
            service.retry_message("missing").await.unwrap_err(),
            QueueError::NotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_from_settings_applies_policy() {
        let settings = QueueSettings {
            max_attempts: 1,
            base_delay_ms: 1,
            ..Default::default()
        };
        let deliverer = Arc::new(MemoryDeliverer::with_simulation(1.0, Duration::ZERO));
        let service = MessageQueueService::from_settings(deliverer, &settings);

        service.enqueue(Message::text("chat-1", "user-1", "hi")).await;
        assert!(service.wait_idle(Duration::from_secs(1)).await);

        let failed = service.failed_messages().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
    }
}
