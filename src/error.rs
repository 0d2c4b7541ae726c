//! Error types for the roster bot.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Attachment relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record store errors.
///
/// `NotFound` is an expected outcome (unknown row); everything else means the
/// backing store could not be reached or answered with something unusable.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Row not found: {key}")]
    NotFound { key: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Malformed store response: {0}")]
    Malformed(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to delete message {message_id} on channel {name}: {reason}")]
    DeleteFailed {
        name: String,
        message_id: String,
        reason: String,
    },

    #[error("Message no longer exists on channel {name}: {reason}")]
    MessageGone { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Rate limited on channel {name}, retry after {retry_after:?}")]
    RateLimited {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ChannelError {
    /// The target message was already deleted (by a moderator, another
    /// cleanup pass, or the author).
    pub fn is_message_gone(&self) -> bool {
        matches!(self, Self::MessageGone { .. })
    }
}

/// Attachment relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Upload of {filename} failed: {reason}")]
    UploadFailed { filename: String, reason: String },

    #[error("Relay rejected credentials: {0}")]
    Unauthorized(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a conversation session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No reply received during {phase} within {after:?}")]
    TimedOut { phase: String, after: Duration },

    #[error("Reply stream closed during {phase}")]
    ReplyStreamClosed { phase: String },

    #[error("Identity reply was empty")]
    EmptyIdentity,

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
