//! In-memory deliverer using DashMap.
//!
//! Messages are stored in memory and will be lost on restart. Each send also
//! refreshes the last-message summary of its chat, mirroring what a remote
//! conversation store does.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;

use crate::error::DeliveryError;
use crate::message::{Message, MessageStatus};

use super::Deliverer;

/// Last-message summary of a chat
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub last_message_id: String,
    pub last_message_preview: String,
    pub last_sender_id: String,
    pub updated_at: DateTime<Utc>,
}

/// In-memory deliverer with optional simulated latency and failures.
pub struct MemoryDeliverer {
    /// Stored messages by id
    messages: DashMap<String, Message>,
    /// Per-chat last-message summaries
    chats: DashMap<String, ChatSummary>,
    /// Latest status reported for each message id, including unsent ones
    statuses: DashMap<String, MessageStatus>,
    /// Probability that a call fails with a network error
    failure_rate: f64,
    /// Artificial latency per call
    latency: Duration,
}

impl MemoryDeliverer {
    /// Create a deliverer that always succeeds immediately
    pub fn new() -> Self {
        Self::with_simulation(0.0, Duration::ZERO)
    }

    /// Create a deliverer that fails with the given probability and adds latency
    pub fn with_simulation(failure_rate: f64, latency: Duration) -> Self {
        Self {
            messages: DashMap::new(),
            chats: DashMap::new(),
            statuses: DashMap::new(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
        }
    }

    /// Get a stored message
    pub fn get(&self, message_id: &str) -> Option<Message> {
        self.messages.get(message_id).map(|m| m.clone())
    }

    /// Get the summary of a chat
    pub fn chat_summary(&self, chat_id: &str) -> Option<ChatSummary> {
        self.chats.get(chat_id).map(|c| c.clone())
    }

    /// Latest status known for a message id
    pub fn status_of(&self, message_id: &str) -> Option<MessageStatus> {
        self.statuses.get(message_id).map(|s| *s)
    }

    /// Number of stored messages
    pub fn stored_count(&self) -> usize {
        self.messages.len()
    }

    async fn simulate_network(&self) -> Result<(), DeliveryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failure_rate > 0.0 && rand::rng().random::<f64>() < self.failure_rate {
            return Err(DeliveryError::Network(
                "simulated connection failure".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryDeliverer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Deliverer for MemoryDeliverer {
    async fn send(&self, message: &Message) -> Result<Message, DeliveryError> {
        self.simulate_network().await?;

        if self.messages.contains_key(&message.id) {
            return Err(DeliveryError::AlreadyExists(message.id.clone()));
        }

        let stored = message.clone().with_status(MessageStatus::Sent);
        self.messages.insert(stored.id.clone(), stored.clone());
        self.statuses.insert(stored.id.clone(), MessageStatus::Sent);

        self.chats.insert(
            stored.chat_id.clone(),
            ChatSummary {
                chat_id: stored.chat_id.clone(),
                last_message_id: stored.id.clone(),
                last_message_preview: stored.preview(),
                last_sender_id: stored.sender_id.clone(),
                updated_at: Utc::now(),
            },
        );

        tracing::debug!(
            message_id = %stored.id,
            chat_id = %stored.chat_id,
            "Message stored"
        );

        Ok(stored)
    }

    async fn update_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), DeliveryError> {
        self.simulate_network().await?;

        // Failed messages usually never reached the store, so the status is
        // tracked by id on its own.
        self.statuses.insert(message_id.to_string(), status);
        if let Some(mut message) = self.messages.get_mut(message_id) {
            message.status = status;
        }
        Ok(())
    }
}
