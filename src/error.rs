//! Error types for sockwire.

use std::io::ErrorKind;

use thiserror::Error;

/// Main error type for all sockwire operations.
#[derive(Debug, Error)]
pub enum SockwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload codec failure other than JSON.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Protocol error (invalid length field, unterminated body, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The length field does not fit in the fixed-width header.
    #[error("Header overflow: length field needs {needed} bytes, header is {width}")]
    HeaderOverflow { needed: usize, width: usize },

    /// Encoded payload contains the terminator byte.
    #[error("Payload contains terminator byte {terminator:#04x}")]
    TerminatorInPayload { terminator: u8 },

    /// Encoded payload is byte-identical to the disconnect sentinel.
    #[error("Payload collides with the disconnect sentinel")]
    SentinelCollision,

    /// Invalid construction-time configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Client is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Server or client is already running.
    #[error("Already running")]
    AlreadyRunning,

    /// Writer did not acknowledge a flush within the grace period.
    #[error("Flush timeout")]
    FlushTimeout,
}

impl SockwireError {
    /// Whether this error means the socket can no longer be used.
    ///
    /// Protocol and codec errors only affect the current frame. Interrupted
    /// or timed-out reads are retried, which is only safe on a frame
    /// boundary: the frame reader reports a failure after partial reads as
    /// `InvalidData`, which is fatal.
    pub fn is_fatal_transport(&self) -> bool {
        match self {
            SockwireError::Io(e) => !matches!(
                e.kind(),
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
            ),
            SockwireError::ConnectionClosed | SockwireError::NotConnected => true,
            _ => false,
        }
    }
}

/// Result type alias using SockwireError.
pub type Result<T> = std::result::Result<T, SockwireError>;
