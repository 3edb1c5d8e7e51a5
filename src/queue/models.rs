//! Data models for the outbox queue.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{Message, MessageStatus};

/// A message awaiting delivery, or parked in the failure store.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    /// The message being delivered
    pub message: Message,

    /// Send attempts made so far, across automatic and manual retries
    pub attempts: u32,

    /// When the message was first enqueued
    pub queued_at: DateTime<Utc>,

    /// When the message was moved to the failure store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Description of the most recent failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedMessage {
    /// Wrap a message for its first delivery cycle.
    pub fn new(message: Message) -> Self {
        Self {
            message: message.with_status(MessageStatus::Sending),
            attempts: 0,
            queued_at: Utc::now(),
            failed_at: None,
            last_error: None,
        }
    }

    /// Identifier of the wrapped message
    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Whether the entry is in the failure store
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }
}

/// Point-in-time counts of the outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStatus {
    pub queued_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    pub has_messages: bool,
}

impl QueueStatus {
    pub fn new(queued_count: usize, failed_count: usize) -> Self {
        let total_count = queued_count + failed_count;
        Self {
            queued_count,
            failed_count,
            total_count,
            has_messages: total_count > 0,
        }
    }
}

/// Outcome of retrying every failed message
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    /// Ids whose re-attempt succeeded
    pub succeeded: Vec<String>,
    /// Ids whose re-attempt failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl RetryReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}
