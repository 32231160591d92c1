//! In-memory artifact store.
//!
//! Objects live in a `DashMap<String, Vec<u8>>`. Presigned links use the
//! `memory://` scheme and carry their expiry as epoch seconds; they are
//! only meaningful inside the process.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ArtifactError, ArtifactStore};

/// Thread-safe in-memory [`ArtifactStore`] serving a single bucket.
///
/// # Examples
///
/// ```
/// use bulkcert::artifact::{ArtifactStore, InMemoryArtifactStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = InMemoryArtifactStore::new("certs");
/// store.put("t/1/certs.zip", b"zip".to_vec()).await.unwrap();
/// assert_eq!(store.get("t/1/certs.zip").await.unwrap(), Some(b"zip".to_vec()));
/// assert_eq!(store.get("t/2/certs.zip").await.unwrap(), None);
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryArtifactStore {
    bucket: String,
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store for `bucket`.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Removes one object directly, bypassing the batch API. Lets tests
    /// simulate objects lost out from under a recorded location.
    pub fn remove(&self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ArtifactError> {
        self.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, ArtifactError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, ArtifactError> {
        Ok(keys
            .iter()
            .filter(|key| self.objects.remove(key.as_str()).is_some())
            .count())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, ArtifactError> {
        let expires_in = chrono::Duration::from_std(expires_in)
            .map_err(|e| ArtifactError::backend(format!("invalid link expiry: {e}")))?;
        let expires = chrono::Utc::now()
            .checked_add_signed(expires_in)
            .ok_or_else(|| ArtifactError::backend("link expiry out of range"))?;
        Ok(format!(
            "memory://{}/{key}?expires={}",
            self.bucket,
            expires.timestamp()
        ))
    }
}
