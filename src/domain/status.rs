//! Task-level views computed from chunk records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregated task status.
///
/// `Complete` iff every chunk is complete. There is no failed or expired
/// state: a chunk that never completes keeps its task `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// At least one chunk is still pending.
    Pending,
    /// All chunks are complete.
    Complete,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// Response of the task status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    /// The task.
    pub task_id: String,
    /// Task creation time, epoch milliseconds.
    pub batch_date: i64,
    /// Aggregated status.
    pub status: TaskState,
    /// Chunks not yet complete.
    pub chunks_pending: usize,
    /// All chunks of the task.
    pub chunks_total: usize,
}

/// What the splitter hands back once a task's chunks are written and
/// published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskAccepted {
    /// Newly generated task id.
    pub task_id: String,
    /// Task creation time, epoch milliseconds.
    pub batch_date: i64,
    /// Number of chunks created.
    pub chunks_total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_view_wire_format() {
        let view = TaskStatusView {
            task_id: "t".to_string(),
            batch_date: 1,
            status: TaskState::Pending,
            chunks_pending: 2,
            chunks_total: 3,
        };
        assert_eq!(
            serde_json::to_value(&view).unwrap(),
            json!({
                "taskId": "t",
                "batchDate": 1,
                "status": "PENDING",
                "chunksPending": 2,
                "chunksTotal": 3
            })
        );
        assert_eq!(TaskState::Complete.to_string(), "COMPLETE");
    }
}
