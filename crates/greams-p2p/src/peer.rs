//! Peer identity.

use crate::{P2pError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An opaque token naming one participant.
///
/// Identities double as the first label of a peer url host, so they are
/// restricted to ASCII letters, digits and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses an identity.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidPeerId`] for an empty string or one that
    /// cannot be used as a host label.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !s.starts_with('-')
            && !s.ends_with('-');
        if !valid {
            return Err(P2pError::InvalidPeerId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix for log output.
    #[must_use]
    pub fn short_id(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerId {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
