use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat message handed to the outbox by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message
    pub id: String,
    /// Conversation the message belongs to
    pub chat_id: String,
    /// Author of the message
    pub sender_id: String,
    /// Message body (text, caption, or system text)
    pub content: String,
    /// Kind of content carried by the message
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Delivery status as last known locally
    pub status: MessageStatus,
    /// When the message was created by the sender
    pub created_at: DateTime<Utc>,
    /// Attachment metadata for image and file messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
}

/// Kind of chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// Delivery status of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Handed to the outbox, not yet confirmed by the backend
    #[default]
    Sending,
    /// Accepted by the backend
    Sent,
    /// Received by the other participants
    Delivered,
    /// Seen by the other participants
    Read,
    /// Delivery was given up after exhausting retries
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attachment metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub file_url: String,
    /// Size in bytes
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Builder for creating chat messages
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: Option<String>,
    chat_id: String,
    sender_id: String,
    content: String,
    message_type: MessageType,
    file: Option<FileMetadata>,
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new(chat_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            id: None,
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: String::new(),
            message_type: MessageType::default(),
            file: None,
        }
    }

    /// Use a caller-assigned identifier instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the message body
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set the message type
    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Attach a file. Text messages become file messages; image messages stay images.
    pub fn file(mut self, file: FileMetadata) -> Self {
        if self.message_type == MessageType::Text {
            self.message_type = MessageType::File;
        }
        self.file = Some(file);
        self
    }

    /// Build the message in the `Sending` state
    pub fn build(self) -> Message {
        Message {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content,
            message_type: self.message_type,
            status: MessageStatus::Sending,
            created_at: Utc::now(),
            file: self.file,
        }
    }
}

impl Message {
    /// Create a plain text message with a generated identifier
    pub fn text(
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        MessageBuilder::new(chat_id, sender_id).content(content).build()
    }

    /// Create a builder for a message in the given chat
    pub fn builder(chat_id: impl Into<String>, sender_id: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(chat_id, sender_id)
    }

    /// Return a copy of this message carrying a different status
    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    /// Short preview used for conversation summaries
    pub fn preview(&self) -> String {
        match self.message_type {
            MessageType::Text | MessageType::System => self.content.chars().take(80).collect(),
            MessageType::Image => "[image]".to_string(),
            MessageType::File => match &self.file {
                Some(file) => format!("[file] {}", file.file_name),
                None => "[file]".to_string(),
            },
        }
    }
}
