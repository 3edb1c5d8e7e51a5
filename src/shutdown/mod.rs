//! Graceful shutdown handling for the outbox.
//!
//! Shutdown runs in three phases:
//! 1. Give in-flight sends a short grace period to finish
//! 2. Dispose the service, cancelling retry waits and remaining sends
//! 3. Wait for the cancelled cycles to stop and report what was left behind

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::queue::MessageQueueService;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to let running cycles finish before cancelling them (default: 2 seconds)
    pub drain_timeout: Duration,
    /// Time to wait for cancelled cycles to stop (default: 1 second)
    pub stop_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Handles graceful shutdown of the outbox service
pub struct GracefulShutdown {
    service: Arc<MessageQueueService>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown handler
    pub fn new(service: Arc<MessageQueueService>) -> Self {
        Self::with_config(service, ShutdownConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(service: Arc<MessageQueueService>, config: ShutdownConfig) -> Self {
        Self { service, config }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();

        // Phase 1: Let running sends finish
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Draining sends");
        let drained = self.service.wait_idle(self.config.drain_timeout).await;
        if !drained {
            tracing::warn!(
                in_flight = self.service.in_flight_count().await,
                "Drain timeout, cancelling remaining sends"
            );
        }

        // Phase 2: Cancel everything still pending
        tracing::info!("Phase 2: Disposing message queue service");
        self.service.dispose();

        // Phase 3: Wait for cancelled cycles to stop
        tracing::info!("Phase 3: Waiting for delivery cycles to stop");
        let stopped = self.service.wait_idle(self.config.stop_timeout).await;

        let status = self.service.queue_status().await;
        let result = ShutdownResult {
            drained,
            stopped,
            undelivered: status.queued_count,
            failed: status.failed_count,
            duration: start.elapsed(),
        };

        if result.undelivered > 0 || result.failed > 0 {
            tracing::warn!(
                undelivered = result.undelivered,
                failed = result.failed,
                "Messages left undelivered at shutdown"
            );
        }

        tracing::info!(
            drained = result.drained,
            stopped = result.stopped,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default, Serialize)]
pub struct ShutdownResult {
    /// Whether all cycles finished on their own within the drain timeout
    pub drained: bool,
    /// Whether all cycles had stopped when shutdown returned
    pub stopped: bool,
    /// Messages still queued (never delivered)
    pub undelivered: usize,
    /// Messages in the failure store
    pub failed: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}
