//! Error taxonomy for bulk issuance operations.
//!
//! [`BulkError`] has exactly three kinds: bad input, unknown or incomplete
//! task, and a failed upstream collaborator. Layer-local errors
//! ([`StorageError`](crate::store::StorageError),
//! [`ArtifactError`](crate::artifact::ArtifactError),
//! [`ChannelError`](crate::channel::ChannelError),
//! [`IssuanceError`](crate::ca::IssuanceError)) are mapped into it at the
//! domain boundary.

use thiserror::Error;

/// Errors surfaced by the splitter, worker, aggregator, and assembler.
///
/// # Examples
///
/// ```
/// use bulkcert::BulkError;
///
/// let err = BulkError::validation("quantity must be greater than zero");
/// assert_eq!(err.status_code(), 400);
///
/// let err = BulkError::not_found("task-1", "no chunk records");
/// assert_eq!(err.status_code(), 404);
/// assert!(err.to_string().contains("task-1"));
/// ```
#[derive(Debug, Error)]
pub enum BulkError {
    /// Rejected input. Never enqueued, never written.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the request.
        message: String,
    },

    /// Unknown task, or a task whose chunks do not all have locations yet.
    #[error("task not found: {task_id} ({reason})")]
    NotFound {
        /// The task that was looked up.
        task_id: String,
        /// Why it counts as not found.
        reason: String,
    },

    /// A collaborator (record store, object store, channel, CA, secrets) failed.
    #[error("{service} failure: {message}")]
    Upstream {
        /// The failing collaborator.
        service: &'static str,
        /// The collaborator's error message, passed through.
        message: String,
    },
}

impl BulkError {
    /// Builds a [`BulkError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Builds a [`BulkError::NotFound`].
    pub fn not_found(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`BulkError::Upstream`].
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Maps this error to the HTTP status code the API answers with.
    ///
    /// - `400`: `Validation`
    /// - `404`: `NotFound`
    /// - `502`: `Upstream`
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Upstream { .. } => 502,
        }
    }

    /// Short machine-readable kind, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Upstream { .. } => "UPSTREAM_FAILURE",
        }
    }
}

/// Result alias for bulk issuance operations.
pub type BulkResult<T> = Result<T, BulkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = BulkError::validation("caAlias must not be empty");
        assert_eq!(
            err.to_string(),
            "validation failed: caAlias must not be empty"
        );

        let err = BulkError::not_found("abc", "chunk 3 has no location yet");
        assert_eq!(
            err.to_string(),
            "task not found: abc (chunk 3 has no location yet)"
        );

        let err = BulkError::upstream("artifact store", "connection reset");
        assert_eq!(err.to_string(), "artifact store failure: connection reset");
    }

    #[test]
    fn status_codes_and_kinds() {
        assert_eq!(BulkError::validation("x").status_code(), 400);
        assert_eq!(BulkError::not_found("t", "r").status_code(), 404);
        assert_eq!(BulkError::upstream("ca", "down").status_code(), 502);

        assert_eq!(BulkError::validation("x").kind(), "VALIDATION");
        assert_eq!(BulkError::not_found("t", "r").kind(), "NOT_FOUND");
        assert_eq!(BulkError::upstream("ca", "down").kind(), "UPSTREAM_FAILURE");
    }
}
