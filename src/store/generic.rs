//! Chunk store with all domain logic delegating to a [`StorageBackend`].
//!
//! [`ChunkStore`] owns canonical JSON serialization, the pending/complete
//! writes, and task-scoped listing. Backends remain dumb key-value stores.
//!
//! # Writers
//!
//! Each record has exactly one writer per phase: the splitter creates it
//! `Pending`, the owning worker overwrites it `Complete`. There is no
//! read-modify-write race to guard, so writes are unconditional puts.
//! A redelivered message rewrites the same terminal status and location.

use std::sync::Arc;

use crate::domain::{now_millis, ChunkRecord, ChunkStatus};
use crate::error::{BulkError, BulkResult};
use crate::store::backend::{make_key, make_prefix, StorageBackend, StorageError};

const SERVICE: &str = "chunk record store";

/// Domain-level access to chunk records.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore").finish_non_exhaustive()
    }
}

impl ChunkStore {
    /// Creates a store over the given backend.
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Creates a store over an already shared backend.
    pub fn from_arc(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    // ---- Serialization helpers (private) ----

    fn serialize_record(record: &ChunkRecord) -> BulkResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| {
            BulkError::upstream(SERVICE, format!("failed to serialize ChunkRecord: {e}"))
        })
    }

    fn deserialize_record(data: &[u8]) -> BulkResult<ChunkRecord> {
        serde_json::from_slice(data).map_err(|e| {
            BulkError::upstream(SERVICE, format!("failed to deserialize ChunkRecord: {e}"))
        })
    }

    fn map_storage_error(err: StorageError, task_id: &str, chunk_id: u32) -> BulkError {
        match err {
            StorageError::NotFound { .. } => {
                BulkError::not_found(task_id, format!("chunk {chunk_id} has no record"))
            },
            StorageError::Backend { message, .. } => BulkError::upstream(SERVICE, message),
        }
    }

    // ---- Domain operations (public) ----

    /// Writes a new `Pending` record.
    ///
    /// Overwrites any record already at the key; task ids are fresh UUIDs,
    /// so this only happens on replayed splitter writes.
    pub async fn create_pending(&self, record: &ChunkRecord) -> BulkResult<()> {
        debug_assert_eq!(record.status, ChunkStatus::Pending);
        let key = make_key(&record.task_id, record.chunk_id);
        let bytes = Self::serialize_record(record)?;
        self.backend
            .put(&key, &bytes)
            .await
            .map_err(|e| Self::map_storage_error(e, &record.task_id, record.chunk_id))?;
        tracing::debug!(
            task_id = %record.task_id,
            chunk_id = record.chunk_id,
            quantity = record.quantity,
            "chunk record created"
        );
        Ok(())
    }

    /// Retrieves one chunk record.
    pub async fn get(&self, task_id: &str, chunk_id: u32) -> BulkResult<ChunkRecord> {
        let key = make_key(task_id, chunk_id);
        let data = self
            .backend
            .get(&key)
            .await
            .map_err(|e| Self::map_storage_error(e, task_id, chunk_id))?;
        Self::deserialize_record(&data)
    }

    /// Marks a chunk `Complete` with the location of its archive.
    ///
    /// Idempotent: completing an already complete chunk rewrites the same
    /// status and (canonical) location.
    pub async fn mark_complete(
        &self,
        task_id: &str,
        chunk_id: u32,
        location: &str,
    ) -> BulkResult<ChunkRecord> {
        let mut record = self.get(task_id, chunk_id).await?;
        if record.is_complete() && record.location.as_deref() != Some(location) {
            tracing::warn!(
                task_id = task_id,
                chunk_id = chunk_id,
                previous = record.location.as_deref().unwrap_or_default(),
                location = location,
                "overwriting a different location on a completed chunk"
            );
        }

        record.status = ChunkStatus::Complete;
        record.location = Some(location.to_string());
        record.updated_at = now_millis();

        let key = make_key(task_id, chunk_id);
        let bytes = Self::serialize_record(&record)?;
        self.backend
            .put(&key, &bytes)
            .await
            .map_err(|e| Self::map_storage_error(e, task_id, chunk_id))?;
        tracing::info!(
            task_id = task_id,
            chunk_id = chunk_id,
            location = location,
            "chunk complete"
        );
        Ok(record)
    }

    /// Lists every chunk record of a task, ordered by `chunk_id`.
    ///
    /// An unknown task yields an empty vector; interpreting that as
    /// not-found is the caller's decision.
    pub async fn list_task(&self, task_id: &str) -> BulkResult<Vec<ChunkRecord>> {
        let prefix = make_prefix(task_id);
        let entries = self
            .backend
            .list_by_prefix(&prefix)
            .await
            .map_err(|e| Self::map_storage_error(e, task_id, 0))?;

        let mut records = entries
            .iter()
            .map(|(_, data)| Self::deserialize_record(data))
            .collect::<BulkResult<Vec<_>>>()?;
        records.sort_by_key(|r| r.chunk_id);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CertInfo;
    use crate::store::memory::InMemoryBackend;
    use pretty_assertions::assert_eq;

    fn record(task_id: &str, chunk_id: u32) -> ChunkRecord {
        ChunkRecord::pending(
            task_id,
            chunk_id,
            10,
            u64::from(chunk_id - 1) * 10,
            1_000,
            "default",
            CertInfo::default(),
        )
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = ChunkStore::new(InMemoryBackend::new());
        store.create_pending(&record("t", 1)).await.unwrap();
        let fetched = store.get("t", 1).await.unwrap();
        assert_eq!(fetched, record("t", 1));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = ChunkStore::new(InMemoryBackend::new());
        let err = store.get("t", 9).await.unwrap_err();
        assert!(matches!(err, BulkError::NotFound { task_id, .. } if task_id == "t"));
    }

    #[tokio::test]
    async fn mark_complete_sets_location_and_is_idempotent() {
        let store = ChunkStore::new(InMemoryBackend::new());
        store.create_pending(&record("t", 1)).await.unwrap();

        let first = store.mark_complete("t", 1, "s3://b/t/1/certs.zip").await.unwrap();
        let second = store.mark_complete("t", 1, "s3://b/t/1/certs.zip").await.unwrap();

        assert_eq!(first.status, ChunkStatus::Complete);
        assert_eq!(second.status, ChunkStatus::Complete);
        assert_eq!(second.location.as_deref(), Some("s3://b/t/1/certs.zip"));
        assert_eq!(second.quantity, 10);
    }

    #[tokio::test]
    async fn mark_complete_without_record_is_not_found() {
        let store = ChunkStore::new(InMemoryBackend::new());
        let err = store.mark_complete("t", 1, "s3://b/k").await.unwrap_err();
        assert!(matches!(err, BulkError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_task_is_sorted_and_scoped() {
        let store = ChunkStore::new(InMemoryBackend::new());
        for chunk_id in [3, 1, 2] {
            store.create_pending(&record("t", chunk_id)).await.unwrap();
        }
        store.create_pending(&record("other", 1)).await.unwrap();

        let ids: Vec<u32> = store
            .list_task("t")
            .await
            .unwrap()
            .iter()
            .map(|r| r.chunk_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(store.list_task("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_upstream_failure() {
        let backend = InMemoryBackend::new();
        backend.put("t:1", b"not json").await.unwrap();
        let store = ChunkStore::new(backend);
        let err = store.get("t", 1).await.unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
