//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single message exceeded the maximum allowed size
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A message arrived that does not fit the request/reply exchange
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The peer closed the stream before a complete message was read
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O error during read or write
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
