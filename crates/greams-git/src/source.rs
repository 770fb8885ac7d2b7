//! Interfaces to the repository that backs an upload-pack response.

use crate::{GitError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A git object name: 40 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    /// The all-zero id used for unborn refs.
    pub fn zero() -> Self {
        Self("0".repeat(40))
    }

    /// Parses a hex object name, accepting either case.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 40 || hex::decode(s).is_err() {
            return Err(GitError::InvalidObjectId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// A reference advertisement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefAdvertisement {
    /// Object ID the ref points to.
    pub id: ObjectId,
    /// Reference name.
    pub name: String,
}

impl RefAdvertisement {
    /// Creates an advertisement for `name` at `id`.
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Repository operations needed to answer a fetch.
///
/// Object-graph walking and pack encoding stay behind this trait; the
/// protocol layer only frames what it returns.
#[async_trait]
pub trait PackSource: Send + Sync {
    /// Lists the refs to advertise, `HEAD` first when it exists.
    async fn advertise_refs(&self) -> Result<Vec<RefAdvertisement>>;

    /// Returns every object reachable from `wants` and not from `haves`.
    async fn list_objects(
        &self,
        wants: &[ObjectId],
        haves: &[ObjectId],
    ) -> Result<BTreeSet<ObjectId>>;

    /// Encodes `oids` into a single pack.
    async fn pack_objects(&self, oids: &[ObjectId]) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let id = ObjectId::from_hex("E196AF265221874DDFB3609306F9F80C8D26D565").unwrap();
        assert_eq!(id.as_str(), "e196af265221874ddfb3609306f9f80c8d26d565");
        assert_eq!(id.to_string().parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn rejects_bad_names() {
        assert!(ObjectId::from_hex("abc").is_err());
        assert!(ObjectId::from_hex(&"g".repeat(40)).is_err());
    }

    #[test]
    fn zero_id() {
        assert_eq!(ObjectId::zero().as_str(), "0".repeat(40));
    }
}
