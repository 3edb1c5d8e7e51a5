//! Outbound message queue with retries and a failure store.
//!
//! - `MessageQueueService`: public façade used by the chat layer
//! - `RetryPolicy`: attempt limit and exponential backoff
//! - the store keeps the live queue, the failure store, and the in-flight
//!   table behind one lock
//! - the scheduler runs one delivery cycle task per message

mod models;
mod retry;
mod scheduler;
mod service;
mod store;

pub use models::{QueueStatus, QueuedMessage, RetryReport};
pub use retry::RetryPolicy;
pub use service::MessageQueueService;
