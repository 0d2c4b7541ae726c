//! Channel abstraction: send, scan history, delete, and receive messages.

pub mod discord;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;

pub use discord::DiscordGateway;

/// Stream of inbound messages from a gateway.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub content_type: Option<String>,
}

impl Attachment {
    /// MIME type, falling back to a generic binary type.
    pub fn mime_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// A message received from a conversational channel.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Gateway-native message ID.
    pub id: String,
    /// Channel the message was posted in.
    pub channel_id: String,
    /// Author's user ID.
    pub author_id: String,
    /// Author's display name.
    pub author_name: String,
    /// Whether the author is a bot account.
    pub author_is_bot: bool,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl IncomingMessage {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let author_id = author_id.into();
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            author_name: author_id.clone(),
            author_id,
            author_is_bot: false,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_author_name(mut self, name: impl Into<String>) -> Self {
        self.author_name = name.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn from_bot(mut self) -> Self {
        self.author_is_bot = true;
        self
    }

    /// Text that pings the author.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.author_id)
    }

    /// Key pairing this author with this channel.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey {
            author_id: self.author_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }
}

/// (author, channel) pair that a conversation is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub author_id: String,
    pub channel_id: String,
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.author_id, self.channel_id)
    }
}

/// Handle to a message the bot posted or found in history.
pub type MessageId = String;

/// A message-based context supporting send, history scan, and delete.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Gateway name (for logging).
    fn name(&self) -> &str;

    /// Start listening; returns the inbound message stream.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Post a message, returning its handle.
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageId, ChannelError>;

    /// Delete one message.
    async fn delete(&self, channel_id: &str, message_id: &str) -> Result<(), ChannelError>;

    /// IDs of the most recent messages, newest first, at most `limit`.
    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageId>, ChannelError>;

    /// Download an attachment's bytes.
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError>;

    /// Check connectivity and credentials.
    async fn health_check(&self) -> Result<(), ChannelError>;
}

/// Split text into chunks of at most `max_len` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let cut = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..cut];
        let split_at = chunk.rfind('\n').or_else(|| chunk.rfind(' ')).unwrap_or(cut);
        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 2000), vec!["Hello"]);
    }

    #[test]
    fn split_message_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(1500), "b".repeat(1500));
        let chunks = split_message(&msg, 2000);
        assert_eq!(chunks, vec!["a".repeat(1500), "b".repeat(1500)]);
    }

    #[test]
    fn split_message_hard_cut() {
        let chunks = split_message(&"a".repeat(2500), 2000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2000);
        assert_eq!(chunks[1].len(), 500);
    }

    #[test]
    fn split_message_counts_chars_not_bytes() {
        let msg = "ñ".repeat(10);
        assert_eq!(split_message(&msg, 10), vec![msg.clone()]);
        let chunks = split_message(&msg, 4);
        assert_eq!(chunks, vec!["ññññ", "ññññ", "ññ"]);
    }

    #[test]
    fn mention_and_key() {
        let msg = IncomingMessage::new("m1", "c1", "u1", "!update");
        assert_eq!(msg.mention(), "<@u1>");
        assert_eq!(msg.conversation_key().to_string(), "u1@c1");
        assert!(!msg.author_is_bot);
    }

    #[test]
    fn attachment_mime_fallback() {
        let att = Attachment {
            id: "a".into(),
            filename: "x.bin".into(),
            url: "https://cdn/x.bin".into(),
            content_type: None,
        };
        assert_eq!(att.mime_type(), "application/octet-stream");
    }
}
