// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain
pub mod delivery;
pub mod message;
pub mod queue;

// Supporting modules
pub mod shutdown;

pub use delivery::{Deliverer, MemoryDeliverer};
pub use error::{DeliveryError, QueueError};
pub use message::{FileMetadata, Message, MessageStatus, MessageType};
pub use queue::{MessageQueueService, QueueStatus, QueuedMessage, RetryPolicy, RetryReport};
