//! Shared error type across chatlink crates.

use thiserror::Error;

/// Stable error codes (used in logs, metrics labels and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed envelope or payload.
    Protocol,
    /// Socket-level failure.
    Transport,
    /// The socket is not open.
    NotConnected,
    /// Invalid configuration.
    Config,
    /// Unsupported config/protocol version.
    UnsupportedVersion,
    /// A single in-flight stream failed.
    Stream,
    /// Automatic reconnects used up the retry budget.
    RetriesExhausted,
}

impl ErrorCode {
    /// String representation used in logs and error payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::Config => "CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Stream => "STREAM",
            ErrorCode::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ChatLinkError>;

/// Unified error type used by core and client.
///
/// Every variant is `Clone` so the last error can live inside the
/// connection state snapshot handed to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatLinkError {
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("not connected")]
    NotConnected,
    #[error("config: {0}")]
    Config(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("stream {message_id} failed: {reason}")]
    Stream { message_id: String, reason: String },
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl ChatLinkError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatLinkError::Protocol(_) => ErrorCode::Protocol,
            ChatLinkError::Transport(_) => ErrorCode::Transport,
            ChatLinkError::NotConnected => ErrorCode::NotConnected,
            ChatLinkError::Config(_) => ErrorCode::Config,
            ChatLinkError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            ChatLinkError::Stream { .. } => ErrorCode::Stream,
            ChatLinkError::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
        }
    }
}
