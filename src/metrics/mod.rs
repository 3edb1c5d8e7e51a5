//! Prometheus metrics for the chat outbox.
//!
//! This module provides metrics for monitoring outbound delivery:
//! - Enqueue and duplicate counters
//! - Send attempt, delivery, retry, and exhaustion counters
//! - Queue and failure store gauges
//! - Send latency

mod helpers;

pub use helpers::{encode_metrics, OutboxMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "outbox";

lazy_static! {
    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Messages accepted into the queue
    pub static ref OUTBOX_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_enqueued_total", METRIC_PREFIX),
        "Total messages accepted into the outbox"
    ).unwrap();

    /// Enqueue calls ignored because the id was already queued or failed
    pub static ref OUTBOX_DUPLICATES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_duplicates_total", METRIC_PREFIX),
        "Total enqueue calls ignored for an id already in the outbox"
    ).unwrap();

    /// Messages currently awaiting delivery, across all services
    pub static ref OUTBOX_QUEUED: IntGauge = register_int_gauge!(
        format!("{}_queued", METRIC_PREFIX),
        "Messages currently awaiting delivery"
    ).unwrap();

    /// Messages currently in a failure store, across all services
    pub static ref OUTBOX_FAILED: IntGauge = register_int_gauge!(
        format!("{}_failed", METRIC_PREFIX),
        "Messages currently in the failure store"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Send attempts by outcome
    pub static ref OUTBOX_SEND_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_send_attempts_total", METRIC_PREFIX),
        "Total send attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Messages delivered
    pub static ref OUTBOX_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_delivered_total", METRIC_PREFIX),
        "Total messages delivered"
    ).unwrap();

    /// Automatic retries scheduled
    pub static ref OUTBOX_RETRIES_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_scheduled_total", METRIC_PREFIX),
        "Total automatic retries scheduled after a failed attempt"
    ).unwrap();

    /// Messages moved to the failure store
    pub static ref OUTBOX_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_exhausted_total", METRIC_PREFIX),
        "Total messages moved to the failure store after exhausting retries"
    ).unwrap();

    /// Manual retries requested by the caller
    pub static ref OUTBOX_MANUAL_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_manual_retries_total", METRIC_PREFIX),
        "Total manual retries of failed messages"
    ).unwrap();

    /// Failed remote status updates
    pub static ref OUTBOX_STATUS_UPDATE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_status_update_failures_total", METRIC_PREFIX),
        "Total failed attempts to mark a message as failed remotely"
    ).unwrap();

    /// Send latency
    pub static ref OUTBOX_SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_send_latency_seconds", METRIC_PREFIX),
        "Deliverer send latency in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();
}
