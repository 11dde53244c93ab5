//! Error types for wireline.

use thiserror::Error;

/// Main error type for all wireline operations.
#[derive(Debug, Error)]
pub enum WirelineError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error for argument or result payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (unexpected packet, malformed frame, short read).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Exception frame received from the peer.
    #[error("{0}")]
    Remote(String),

    /// Argument validation failure.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// Application-level failure returned by a call handler.
    #[error("{0}")]
    Handler(String),

    /// No handler registered under the requested method name.
    #[error("method '{0}' not found")]
    MethodNotFound(String),

    /// Handler registered twice under the same name.
    #[error("handler '{0}' already exists")]
    HandlerExists(String),

    /// Handler registered under an empty name.
    #[error("name of handler can not be empty")]
    EmptyHandlerName,

    /// Connection closed while a call was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// No connection could be opened or reused within the connect timeout.
    #[error("open connect timeout")]
    AcquireTimeout,

    /// Call deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Result type alias using WirelineError.
pub type Result<T> = std::result::Result<T, WirelineError>;
