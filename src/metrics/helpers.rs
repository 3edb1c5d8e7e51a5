//! Metrics helper struct for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    OUTBOX_DELIVERED_TOTAL, OUTBOX_DUPLICATES_TOTAL, OUTBOX_ENQUEUED_TOTAL, OUTBOX_EXHAUSTED_TOTAL,
    OUTBOX_FAILED, OUTBOX_MANUAL_RETRIES_TOTAL, OUTBOX_QUEUED, OUTBOX_RETRIES_SCHEDULED_TOTAL,
    OUTBOX_SEND_ATTEMPTS_TOTAL, OUTBOX_SEND_LATENCY, OUTBOX_STATUS_UPDATE_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording outbox metrics
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a message accepted into the queue
    pub fn record_enqueued() {
        OUTBOX_ENQUEUED_TOTAL.inc();
    }

    /// Record an ignored duplicate enqueue
    pub fn record_duplicate() {
        OUTBOX_DUPLICATES_TOTAL.inc();
    }

    /// Record a send attempt and its latency
    pub fn record_attempt(succeeded: bool, latency: Duration) {
        let outcome = if succeeded { "success" } else { "failure" };
        OUTBOX_SEND_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
        OUTBOX_SEND_LATENCY.observe(latency.as_secs_f64());
    }

    /// Record a delivered message
    pub fn record_delivered() {
        OUTBOX_DELIVERED_TOTAL.inc();
    }

    /// Record a scheduled automatic retry
    pub fn record_retry_scheduled() {
        OUTBOX_RETRIES_SCHEDULED_TOTAL.inc();
    }

    /// Record a message moved to the failure store
    pub fn record_exhausted() {
        OUTBOX_EXHAUSTED_TOTAL.inc();
    }

    /// Record a manual retry
    pub fn record_manual_retry() {
        OUTBOX_MANUAL_RETRIES_TOTAL.inc();
    }

    /// Record a failed remote status update
    pub fn record_status_update_failure() {
        OUTBOX_STATUS_UPDATE_FAILURES_TOTAL.inc();
    }

    /// Apply a change in queue and failure store sizes.
    ///
    /// The gauges sum every live service in the process, so stores report
    /// deltas rather than their own totals.
    pub fn adjust_sizes(queued_delta: i64, failed_delta: i64) {
        OUTBOX_QUEUED.add(queued_delta);
        OUTBOX_FAILED.add(failed_delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_includes_outbox_prefix() {
        OutboxMetrics::record_enqueued();
        OutboxMetrics::record_attempt(true, Duration::from_millis(3));

        let text = encode_metrics().unwrap();
        assert!(text.contains("outbox_enqueued_total"));
        assert!(text.contains("outbox_send_attempts_total"));
    }
}
