//! In-memory storage backend.
//!
//! [`InMemoryBackend`] provides a thread-safe [`StorageBackend`] using
//! `DashMap<String, Vec<u8>>`. It is a dumb KV store with no domain logic,
//! used by tests and by the single-process server.
//!
//! # Examples
//!
//! ```
//! use bulkcert::store::generic::ChunkStore;
//! use bulkcert::store::memory::InMemoryBackend;
//!
//! let store = ChunkStore::new(InMemoryBackend::new());
//! ```

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::backend::{StorageBackend, StorageError};

/// Thread-safe in-memory storage backend using [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    ///
    /// # Examples
    ///
    /// ```
    /// use bulkcert::store::memory::InMemoryBackend;
    ///
    /// let backend = InMemoryBackend::new();
    /// assert!(backend.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the backend contains no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.data
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
