//! P2P error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// The request url does not name a peer.
    #[error("invalid peer address (expected http://{{peer-id}}.webrtcpeer/...): {0}")]
    InvalidAddress(String),

    /// The string is not a valid peer identity.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// No response arrived within the configured window.
    #[error("request {request_id} timed out after {} millis", .duration.as_millis())]
    Timeout {
        /// Id of the abandoned request.
        request_id: String,
        /// Configured timeout.
        duration: Duration,
    },

    /// Peer not found.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The underlying transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The link closed before the operation completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A streaming body failed while being read.
    #[error("body error: {0}")]
    Body(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
