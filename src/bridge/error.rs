//! Error types for the messaging bridge

use std::fmt;
use std::time::Duration;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while exchanging messages with an agent
///
/// Everything except [`BridgeError::Bind`] is scoped to a single exchange and
/// must never take down the loop that produced it.
#[derive(Debug)]
pub enum BridgeError {
    /// Malformed message bytes (invalid UTF-8 or JSON, or a wrong shape)
    Decode(String),

    /// The address is already in use (fatal for the owning process)
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The agent cannot be reached
    Connection { addr: String, reason: String },

    /// No reply arrived within the deadline
    Timeout { channel_id: String, after: Duration },

    /// Request type outside of the known set
    UnknownType(String),

    /// The agent answered, but with an error
    Agent(String),

    /// The socket handle has already been closed
    Closed,

    /// I/O error on an established socket
    Io(std::io::Error),
}

impl BridgeError {
    /// Whether this error should end the owning process
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Bind { .. })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Decode(msg) => write!(f, "Failed to parse message: {msg}"),
            BridgeError::Bind { addr, source } => {
                write!(f, "failed to bind {addr}: {source}")
            }
            BridgeError::Connection { addr, reason } => {
                write!(f, "failed to connect to {addr}: {reason}")
            }
            BridgeError::Timeout { channel_id, after } => write!(
                f,
                "request for channel {channel_id} timed out after {}ms",
                after.as_millis()
            ),
            BridgeError::UnknownType(kind) => write!(f, "Unknown request type: {kind}"),
            BridgeError::Agent(msg) => write!(f, "agent reported an error: {msg}"),
            BridgeError::Closed => write!(f, "socket is closed"),
            BridgeError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Bind { source, .. } => Some(source),
            BridgeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(err.to_string())
    }
}
