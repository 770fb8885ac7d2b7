//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// A frame would not fit in the 4 hex digit length header.
    #[error("pkt-line payload of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    /// An operation was attempted in a state that does not permit it.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// The producer aborted the output sequence.
    #[error("output aborted: {0}")]
    Aborted(String),

    /// The remote reported a fatal error on side-band channel 3.
    #[error("remote error: {0}")]
    Remote(String),

    /// Invalid object name.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failure inside a pack or ref collaborator.
    #[error("pack source error: {0}")]
    Source(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
