use thiserror::Error;

/// Transient failure reported by a [`Deliverer`](crate::delivery::Deliverer).
///
/// Every variant is retryable by the scheduler except `AlreadyExists`, which
/// means an earlier attempt already reached the backend and counts as success.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Send timed out after {0}ms")]
    Timeout(u64),

    #[error("Message already exists: {0}")]
    AlreadyExists(String),
}

impl DeliveryError {
    /// Whether the backend reports that the message was stored by an earlier attempt
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DeliveryError::AlreadyExists(_))
    }
}

/// Errors surfaced by the public operations of the outbox service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Failed message not found: {0}")]
    NotFound(String),

    #[error("Message {0} is still being processed")]
    InFlight(String),

    #[error("Message queue service has been disposed")]
    Disposed,

    #[error("Delivery cycle for {0} was cancelled")]
    Cancelled(String),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Top-level error for the console binary
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, QueueError>;
