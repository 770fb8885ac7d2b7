//! Byte-addressable file storage.
//!
//! Paths are relative, `/`-separated, and may not contain `..`. Both
//! backends treat `a//b` and `./a/b` as `a/b`.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::{NodeError, Result};

/// Trait for file storage backends.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Reads a whole file.
    ///
    /// Fails with [`NodeError::NotFound`] when it does not exist.
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Creates or replaces a file, creating parent directories as needed.
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Lists the entry names directly under `path`, sorted.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>>;
}

/// Splits `path` into its components, rejecting parent references.
fn components(path: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(NodeError::InvalidPath(path.to_string())),
            part if part.contains('\\') || part.contains('\0') => {
                return Err(NodeError::InvalidPath(path.to_string()))
            }
            part => parts.push(part),
        }
    }
    Ok(parts)
}

fn file_key(path: &str) -> Result<String> {
    let parts = components(path)?;
    if parts.is_empty() {
        return Err(NodeError::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

/// Store rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Creates a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, parts: &[&str]) -> PathBuf {
        parts.iter().fold(self.root.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl FileStore for DiskStore {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let key = file_key(path)?;
        let parts: Vec<&str> = key.split('/').collect();
        match tokio::fs::read(self.resolve(&parts)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(NodeError::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let key = file_key(path)?;
        let parts: Vec<&str> = key.split('/').collect();
        let target = self.resolve(&parts);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;
        tracing::trace!(path = %key, bytes = data.len(), "Wrote file");
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let parts = components(path)?;
        let mut entries = match tokio::fs::read_dir(self.resolve(&parts)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(NodeError::NotFound(parts.join("/")))
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns true if no file has been written.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let key = file_key(path)?;
        self.files
            .read()
            .get(&key)
            .cloned()
            .ok_or(NodeError::NotFound(key))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let key = file_key(path)?;
        self.files.write().insert(key, data);
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let parts = components(path)?;
        let prefix = if parts.is_empty() {
            String::new()
        } else {
            format!("{}/", parts.join("/"))
        };

        let files = self.files.read();
        let names: BTreeSet<String> = files
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .map(str::to_string)
            .collect();

        if names.is_empty() && !prefix.is_empty() {
            return Err(NodeError::NotFound(parts.join("/")));
        }
        Ok(names.into_iter().collect())
    }
}
