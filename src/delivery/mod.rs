//! Delivery abstraction between the outbox and the remote message store.
//!
//! The outbox never talks to the network itself. It hands every attempt to a
//! [`Deliverer`], which persists the message remotely and reports failures as
//! [`DeliveryError`] values:
//!
//! - `MemoryDeliverer`: in-process store using DashMap, with optional simulated
//!   latency and failures (used by the console binary and tests)

mod memory;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::message::{Message, MessageStatus};

pub use memory::{ChatSummary, MemoryDeliverer};

/// Performs the actual send and status update for outbound messages.
///
/// Implementations must be safe to call repeatedly for the same message id.
/// A send that the backend rejects because the message already exists should
/// be reported as [`DeliveryError::AlreadyExists`]; the outbox treats it as success.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Persist the message remotely and return the stored copy
    async fn send(&self, message: &Message) -> Result<Message, DeliveryError>;

    /// Record a new status for an already known message
    async fn update_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), DeliveryError>;
}
