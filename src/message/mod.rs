//! Chat message types handed to the outbox.

mod types;

pub use types::{FileMetadata, Message, MessageBuilder, MessageStatus, MessageType};
