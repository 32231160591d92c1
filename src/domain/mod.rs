//! Domain types: chunk records, work messages, certificate templates, and
//! the task status view computed from chunk records.

pub mod chunk;
pub mod message;
pub mod status;

pub use chunk::{ChunkRecord, ChunkStatus};
pub use message::{CertInfo, NameGenerator, WorkMessage};
pub use status::{TaskAccepted, TaskState, TaskStatusView};

/// Current UTC time in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
