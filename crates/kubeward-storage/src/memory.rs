//! In-memory storage backend.
//!
//! Holds everything in a `BTreeMap` behind a `RwLock`. Nothing survives a
//! restart, which makes it the default for local development and the backend
//! every unit test in the workspace runs against.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory storage backend backed by a sorted map.
///
/// Cloning is cheap and clones share the same underlying map.
///
/// # Examples
///
/// ```
/// # use kubeward_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("clusters/u1/c1", b"{}").await.unwrap();
/// assert!(backend.exists("clusters/u1/c1").await.unwrap());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.read().await.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("clusters/nobody/none").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_previous_value() {
        let backend = MemoryBackend::new();
        backend.put("clusters/u/a", b"v1").await.unwrap();
        backend.put("clusters/u/a", b"v2").await.unwrap();
        assert_eq!(
            backend.get("clusters/u/a").await.unwrap(),
            Some(b"v2".to_vec())
        );
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("clusters/u/a", b"x").await.unwrap();
        backend.delete("clusters/u/a").await.unwrap();
        backend.delete("clusters/u/a").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_scopes_to_owner_prefix() {
        let backend = MemoryBackend::new();
        backend.put("clusters/alice/1", b"1").await.unwrap();
        backend.put("clusters/alice/2", b"2").await.unwrap();
        backend.put("clusters/alicia/3", b"3").await.unwrap();
        backend.put("clusters/bob/4", b"4").await.unwrap();

        let keys = backend.list("clusters/alice/").await.unwrap();
        assert_eq!(keys, vec!["clusters/alice/1", "clusters/alice/2"]);

        let all = backend.list("").await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let backend = MemoryBackend::new();
        let other = backend.clone();
        backend.put("k", b"v").await.unwrap();
        assert!(other.exists("k").await.unwrap());
    }
}
