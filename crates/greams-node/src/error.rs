//! Node error types.

use greams_git::GitError;
use greams_p2p::P2pError;
use thiserror::Error;

/// Errors raised by the node library.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Git protocol error.
    #[error("git error: {0}")]
    Git(#[from] GitError),

    /// Peer transport error.
    #[error("p2p error: {0}")]
    P2p(#[from] P2pError),

    /// The requested file does not exist in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path escapes the store root or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The peer answered with a non-success status.
    #[error("peer returned {status} {status_text}")]
    Status {
        /// Status code.
        status: u16,
        /// Status text.
        status_text: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed YAML configuration.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
