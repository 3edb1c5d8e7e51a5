//! Per-message delivery cycles.
//!
//! Each accepted or manually retried message gets one spawned task that runs
//! the cycle `Sending -> {Delivered | RetryWait -> Sending | Failed}` until a
//! terminal state or cancellation. The task owns the message's in-flight slot,
//! so a second send for the same id cannot start while it runs. Different
//! messages run fully in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::delivery::Deliverer;
use crate::error::DeliveryError;
use crate::message::{Message, MessageStatus};
use crate::metrics::OutboxMetrics;

use super::retry::RetryPolicy;
use super::store::MessageStore;

/// Receives the outcome of the first attempt of a cycle
pub(crate) type AttemptReport = oneshot::Sender<Result<Message, DeliveryError>>;

pub(crate) struct QueueScheduler {
    deliverer: Arc<dyn Deliverer>,
    policy: RetryPolicy,
    store: Arc<MessageStore>,
    send_timeout: Duration,
}

impl QueueScheduler {
    pub fn new(
        deliverer: Arc<dyn Deliverer>,
        policy: RetryPolicy,
        store: Arc<MessageStore>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            deliverer,
            policy,
            store,
            send_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Spawn the delivery cycle of a message whose slot is already claimed.
    pub fn spawn_cycle(
        self: &Arc<Self>,
        message_id: String,
        token: CancellationToken,
        report: Option<AttemptReport>,
    ) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_cycle(message_id, token, report).await;
        });
    }

    #[tracing::instrument(name = "outbox.cycle", skip(self, token, report))]
    async fn run_cycle(
        &self,
        message_id: String,
        token: CancellationToken,
        mut report: Option<AttemptReport>,
    ) {
        loop {
            let Some(message) = self.store.pending_message(&message_id).await else {
                break;
            };

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("Send cancelled");
                    break;
                }
                outcome = self.attempt(&message) => outcome,
            };

            match outcome {
                Ok(delivered) => {
                    if self.store.mark_delivered(&message_id).await {
                        OutboxMetrics::record_delivered();
                        tracing::info!(chat_id = %message.chat_id, "Message delivered");
                        send_report(&mut report, Ok(delivered));
                        return;
                    }
                    break;
                }
                Err(error) => {
                    let Some(attempts) = self
                        .store
                        .record_failure(&message_id, error.to_string())
                        .await
                    else {
                        break;
                    };

                    if !self.policy.should_retry(attempts) {
                        if self.give_up(&message_id, &token, attempts, &error).await {
                            send_report(&mut report, Err(error));
                            return;
                        }
                        break;
                    }

                    let delay = self.policy.delay_before(attempts);
                    OutboxMetrics::record_retry_scheduled();
                    tracing::warn!(
                        attempts = attempts,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Send failed, retry scheduled"
                    );
                    send_report(&mut report, Err(error));

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            tracing::debug!("Retry wait cancelled");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // Cancelled, or the store is sealed: no transition, only free the slot
        self.store.release(&message_id).await;
    }

    /// One bounded send. `AlreadyExists` counts as delivered.
    async fn attempt(&self, message: &Message) -> Result<Message, DeliveryError> {
        let started = Instant::now();

        let result = match timeout(self.send_timeout, self.deliverer.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout.as_millis() as u64)),
        };

        let result = match result {
            Err(e) if e.is_already_exists() => {
                tracing::debug!("Backend already has the message, treating as delivered");
                Ok(message.clone().with_status(MessageStatus::Sent))
            }
            other => other,
        };

        OutboxMetrics::record_attempt(result.is_ok(), started.elapsed());
        result
    }

    /// Park the message in the failure store, then mark it failed remotely
    /// (best-effort, bounded by the send timeout). The slot is released once
    /// the status update settles. Returns false if sealed before the move.
    async fn give_up(
        &self,
        message_id: &str,
        token: &CancellationToken,
        attempts: u32,
        error: &DeliveryError,
    ) -> bool {
        if self.store.mark_failed(message_id).await.is_none() {
            return false;
        }

        OutboxMetrics::record_exhausted();
        tracing::error!(
            attempts = attempts,
            error = %error,
            "Retries exhausted, message moved to failure store"
        );

        let status_update = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = timeout(
                self.send_timeout,
                self.deliverer.update_status(message_id, MessageStatus::Failed),
            ) => Some(result),
        };

        match status_update {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => {
                OutboxMetrics::record_status_update_failure();
                tracing::warn!(error = %e, "Failed to mark message as failed remotely");
            }
            Some(Err(_)) => {
                OutboxMetrics::record_status_update_failure();
                tracing::warn!(
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Timed out marking message as failed remotely"
                );
            }
            None => tracing::debug!("Status update cancelled"),
        }

        self.store.release(message_id).await;
        true
    }
}

fn send_report(report: &mut Option<AttemptReport>, outcome: Result<Message, DeliveryError>) {
    if let Some(tx) = report.take() {
        // The caller may have stopped waiting
        let _ = tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::models::QueuedMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` sends, then succeeds
    struct FlakyDeliverer {
        failures: usize,
        sends: AtomicUsize,
        status_updates: AtomicUsize,
    }

    impl FlakyDeliverer {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                sends: AtomicUsize::new(0),
                status_updates: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Deliverer for FlakyDeliverer {
        async fn send(&self, message: &Message) -> Result<Message, DeliveryError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(DeliveryError::Network(format!("failure {}", n + 1)))
            } else {
                Ok(message.clone().with_status(MessageStatus::Sent))
            }
        }

        async fn update_status(
            &self,
            _message_id: &str,
            _status: MessageStatus,
        ) -> Result<(), DeliveryError> {
            self.status_updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    async fn start(
        deliverer: Arc<FlakyDeliverer>,
    ) -> (Arc<QueueScheduler>, Arc<MessageStore>, oneshot::Receiver<Result<Message, DeliveryError>>) {
        let store = Arc::new(MessageStore::new(CancellationToken::new()));
        let scheduler = Arc::new(QueueScheduler::new(
            deliverer,
            fast_policy(),
            store.clone(),
            Duration::from_secs(1),
        ));

        let message = Message::builder("chat-1", "user-1").id("msg_1").content("hi").build();
        let token = store.insert(QueuedMessage::new(message)).await.unwrap();
        let (tx, rx) = oneshot::channel();
        scheduler.spawn_cycle("msg_1".to_string(), token, Some(tx));
        (scheduler, store, rx)
    }

    async fn settle(store: &MessageStore) {
        for _ in 0..200 {
            if store.in_flight_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("delivery cycle did not settle");
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let deliverer = Arc::new(FlakyDeliverer::new(2));
        let (_scheduler, store, rx) = start(deliverer.clone()).await;

        // First attempt failed, reported right away
        let first = rx.await.unwrap();
        assert_eq!(first.unwrap_err(), DeliveryError::Network("failure 1".to_string()));

        settle(&store).await;
        assert_eq!(deliverer.sends.load(Ordering::SeqCst), 3);
        assert_eq!(deliverer.status_updates.load(Ordering::SeqCst), 0);
        assert_eq!(store.status().await.total_count, 0);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let deliverer = Arc::new(FlakyDeliverer::new(usize::MAX));
        let (_scheduler, store, _rx) = start(deliverer.clone()).await;

        settle(&store).await;
        assert_eq!(deliverer.sends.load(Ordering::SeqCst), 3);
        assert_eq!(deliverer.status_updates.load(Ordering::SeqCst), 1);

        let failed = store.failed().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 3);
        assert_eq!(failed[0].last_error.as_deref(), Some("Network error: failure 3"));
    }
}
