//! Low-level key-value storage backend trait and supporting types.
//!
//! The [`StorageBackend`] trait defines the contract that all chunk record
//! engines implement: [`get`](StorageBackend::get),
//! [`put`](StorageBackend::put), and
//! [`list_by_prefix`](StorageBackend::list_by_prefix).
//!
//! Domain logic (status transitions, serialization, ordering) does **not**
//! belong here. Backends are dumb KV stores; domain logic lives in
//! [`ChunkStore`](crate::store::generic::ChunkStore).
//!
//! # Key Structure
//!
//! Keys are composite strings in the format `{task_id}:{chunk_id}`. The
//! colon separator is safe because `task_id` is a `UUIDv4` (no colons) and
//! `chunk_id` is a decimal integer. Prefix queries use `{task_id}:` to scope
//! listings to one task.
//!
//! There is no delete: chunk records are never removed individually, and
//! task-wide deletion only removes artifacts.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during raw storage operations.
///
/// [`ChunkStore`](crate::store::generic::ChunkStore) maps them to
/// [`BulkError`](crate::error::BulkError) before surfacing to callers.
///
/// # Examples
///
/// ```
/// use bulkcert::store::backend::StorageError;
///
/// let err = StorageError::NotFound { key: "task-1:3".to_string() };
/// assert!(err.to_string().contains("task-1:3"));
/// ```
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key was not found in storage.
    #[error("key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// An I/O or backend-specific error occurred (network failure,
    /// throttling, malformed item).
    #[error("backend error: {message}")]
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Builds a [`StorageError::Backend`] without an underlying source.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

/// Key-value storage backend for chunk records.
///
/// Implementations store opaque bytes (canonical JSON produced by
/// `ChunkStore`) and must store and return keys verbatim.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the splitter, every worker, and
/// every status query share one backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a record by key.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the given key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Stores a record unconditionally (create or overwrite).
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Lists all records whose key starts with the given prefix.
    ///
    /// Returns `(key, data)` tuples in no particular order.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

/// Constructs a storage key from task and chunk identifiers.
///
/// # Examples
///
/// ```
/// use bulkcert::store::backend::make_key;
///
/// assert_eq!(make_key("task-abc", 7), "task-abc:7");
/// ```
pub fn make_key(task_id: &str, chunk_id: u32) -> String {
    format!("{task_id}:{chunk_id}")
}

/// Parses a storage key into `(task_id, chunk_id)` components.
///
/// Splits on the last colon. Returns `None` if there is no colon or the
/// chunk component is not a number.
///
/// # Examples
///
/// ```
/// use bulkcert::store::backend::parse_key;
///
/// assert_eq!(parse_key("task-abc:7"), Some(("task-abc", 7)));
/// assert_eq!(parse_key("no-colon"), None);
/// assert_eq!(parse_key("task:x"), None);
/// ```
pub fn parse_key(key: &str) -> Option<(&str, u32)> {
    let (task_id, chunk_id) = key.rsplit_once(':')?;
    Some((task_id, chunk_id.parse().ok()?))
}

/// Constructs the prefix listing every chunk of a task.
///
/// # Examples
///
/// ```
/// use bulkcert::store::backend::make_prefix;
///
/// assert_eq!(make_prefix("task-abc"), "task-abc:");
/// ```
pub fn make_prefix(task_id: &str) -> String {
    format!("{task_id}:")
}
