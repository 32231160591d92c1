//! Status aggregation: reduces a task's chunk records to one answer.
//!
//! Every call reads the records afresh. Two successive calls may disagree
//! while chunks are completing.

use crate::domain::{ChunkRecord, TaskState, TaskStatusView};
use crate::error::{BulkError, BulkResult};
use crate::store::ChunkStore;

/// Reduces chunk records into a [`TaskStatusView`].
///
/// Returns `None` for an empty slice.
///
/// # Examples
///
/// ```
/// use bulkcert::aggregator::reduce;
/// use bulkcert::domain::{CertInfo, ChunkRecord, ChunkStatus, TaskState};
///
/// let mut a = ChunkRecord::pending("t", 1, 50, 0, 7, "default", CertInfo::default());
/// let b = ChunkRecord::pending("t", 2, 10, 50, 7, "default", CertInfo::default());
/// a.status = ChunkStatus::Complete;
///
/// let view = reduce("t", &[a, b]).unwrap();
/// assert_eq!(view.status, TaskState::Pending);
/// assert_eq!((view.chunks_pending, view.chunks_total), (1, 2));
/// assert_eq!(view.batch_date, 7);
/// assert!(reduce("t", &[]).is_none());
/// ```
pub fn reduce(task_id: &str, records: &[ChunkRecord]) -> Option<TaskStatusView> {
    let first = records.first()?;
    let chunks_pending = records.iter().filter(|r| !r.is_complete()).count();
    Some(TaskStatusView {
        task_id: task_id.to_string(),
        batch_date: first.batch_date,
        status: if chunks_pending > 0 {
            TaskState::Pending
        } else {
            TaskState::Complete
        },
        chunks_pending,
        chunks_total: records.len(),
    })
}

/// Read-side view over the chunk record store.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    store: ChunkStore,
}

impl StatusAggregator {
    /// Creates an aggregator.
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    /// Aggregated status of `task_id`; `NotFound` if it has no records.
    pub async fn status(&self, task_id: &str) -> BulkResult<TaskStatusView> {
        let records = self.store.list_task(task_id).await?;
        reduce(task_id, &records).ok_or_else(|| BulkError::not_found(task_id, "no chunk records"))
    }

    /// Archive locations of every chunk, in chunk order.
    ///
    /// `NotFound` if the task is unknown or any chunk has no location yet.
    /// Never returns a partial list.
    pub async fn locations(&self, task_id: &str) -> BulkResult<Vec<String>> {
        let records = self.store.list_task(task_id).await?;
        if records.is_empty() {
            return Err(BulkError::not_found(task_id, "no chunk records"));
        }
        records
            .into_iter()
            .map(|record| {
                record.location.ok_or_else(|| {
                    BulkError::not_found(
                        task_id,
                        format!("chunk {} has no location yet", record.chunk_id),
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CertInfo, ChunkStatus};

    fn record(chunk_id: u32, complete: bool) -> ChunkRecord {
        let offset = u64::from(chunk_id);
        let info = CertInfo::default();
        let mut record = ChunkRecord::pending("t", chunk_id, 1, offset, 42, "ca", info);
        if complete {
            record.status = ChunkStatus::Complete;
            record.location = Some(format!("s3://b/t/{chunk_id}/certs.zip"));
        }
        record
    }

    #[test]
    fn all_complete_is_complete() {
        let view = reduce("t", &[record(1, true), record(2, true)]).unwrap();
        assert_eq!(view.status, TaskState::Complete);
        assert_eq!(view.chunks_pending, 0);
    }

    #[test]
    fn reduction_ignores_order() {
        let forward = reduce("t", &[record(1, true), record(2, false)]).unwrap();
        let backward = reduce("t", &[record(2, false), record(1, true)]).unwrap();
        assert_eq!(forward, backward);
    }
}
