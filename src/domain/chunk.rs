//! Chunk record -- the only durable state in the system.
//!
//! A task has no record of its own. It exists as the set of
//! [`ChunkRecord`]s sharing a `task_id`, and its status is the reduction of
//! their [`ChunkStatus`] values.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::{CertInfo, WorkMessage};

/// Persisted chunk status.
///
/// Binary by construction: a chunk being processed is still `Pending`.
///
/// ```text
/// Pending -> Complete   (one worker, one write; re-delivery rewrites Complete)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    /// Created by the splitter; no archive recorded yet.
    Pending,
    /// A worker uploaded the archive and recorded its location.
    Complete,
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// Stored representation of one chunk of a bulk issuance task.
///
/// Besides status and location, the record keeps everything needed to
/// rebuild its [`WorkMessage`], so a pending chunk can be replayed without
/// the original request.
///
/// # Examples
///
/// ```
/// use bulkcert::domain::{CertInfo, ChunkRecord, ChunkStatus};
///
/// let record =
///     ChunkRecord::pending("task-1", 2, 50, 50, 1_700_000_000_000, "acme", CertInfo::default());
/// assert_eq!(record.status, ChunkStatus::Pending);
/// assert!(record.location.is_none());
///
/// let message = record.to_message();
/// assert_eq!(message.chunk_id, 2);
/// assert_eq!(message.offset, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    /// Owning task.
    pub task_id: String,

    /// 1-based sequence number, contiguous within the task.
    pub chunk_id: u32,

    /// Certificates this chunk produces.
    pub quantity: u32,

    /// Task-wide index of this chunk's first certificate.
    pub offset: u64,

    /// Current status.
    pub status: ChunkStatus,

    /// Artifact-store URI of the chunk archive. Present once `Complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Task creation time, epoch milliseconds. Identical on every chunk.
    pub batch_date: i64,

    /// CA alias the task was requested against.
    pub ca_alias: String,

    /// Subject template shared by every chunk of the task.
    pub cert_info: CertInfo,

    /// Last write time, epoch milliseconds.
    pub updated_at: i64,
}

impl ChunkRecord {
    /// Creates a `Pending` record.
    pub fn pending(
        task_id: impl Into<String>,
        chunk_id: u32,
        quantity: u32,
        offset: u64,
        batch_date: i64,
        ca_alias: impl Into<String>,
        cert_info: CertInfo,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            chunk_id,
            quantity,
            offset,
            status: ChunkStatus::Pending,
            location: None,
            batch_date,
            ca_alias: ca_alias.into(),
            cert_info,
            updated_at: batch_date,
        }
    }

    /// Returns `true` once the chunk is `Complete`.
    pub fn is_complete(&self) -> bool {
        self.status == ChunkStatus::Complete
    }

    /// Rebuilds the work message that processes this chunk.
    pub fn to_message(&self) -> WorkMessage {
        WorkMessage {
            task_id: self.task_id.clone(),
            chunk_id: self.chunk_id,
            quantity: self.quantity,
            offset: self.offset,
            cert_info: self.cert_info.clone(),
            ca_alias: self.ca_alias.clone(),
        }
    }
}
