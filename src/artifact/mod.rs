//! Object storage for chunk archives.
//!
//! One archive per chunk lives at the canonical key
//! `{prefix}/{task_id}/{chunk_id}/certs.zip`; the location recorded in the
//! chunk record is that key rendered as `s3://{bucket}/{key}`. Task-wide
//! deletion lists and removes everything under `{prefix}/{task_id}/`.
//!
//! # Backends
//!
//! - [`InMemoryArtifactStore`](memory::InMemoryArtifactStore) -- `DashMap`-based.
//! - `S3ArtifactStore` -- behind the `s3` feature.

pub mod archive;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use archive::{merge_archives, ChunkArchive, MANIFEST_NAME};
pub use memory::InMemoryArtifactStore;

/// Errors raised by artifact stores and archive handling.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A location string is not `s3://bucket/key`.
    #[error("invalid artifact location: {location}")]
    InvalidLocation {
        /// The rejected location.
        location: String,
    },

    /// A location points at a bucket this store does not serve.
    #[error("location bucket {found} does not match store bucket {expected}")]
    ForeignBucket {
        /// The store's bucket.
        expected: String,
        /// The bucket named by the location.
        found: String,
    },

    /// Archive could not be written or read.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// I/O while writing a bundle to local storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The object store failed.
    #[error("object store error: {message}")]
    Backend {
        /// Human-readable description.
        message: String,
        /// The underlying error, if available.
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ArtifactError {
    /// Builds an [`ArtifactError::Backend`] without an underlying source.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

impl From<ArtifactError> for crate::error::BulkError {
    fn from(err: ArtifactError) -> Self {
        crate::error::BulkError::upstream("artifact store", err.to_string())
    }
}

/// A `bucket` + `key` pair, rendered as `s3://bucket/key`.
///
/// # Examples
///
/// ```
/// use bulkcert::artifact::ObjectLocation;
///
/// let location = ObjectLocation::parse("s3://certs/bulk/t1/2/certs.zip").unwrap();
/// assert_eq!(location.bucket, "certs");
/// assert_eq!(location.key, "bulk/t1/2/certs.zip");
/// assert_eq!(location.to_string(), "s3://certs/bulk/t1/2/certs.zip");
///
/// assert!(ObjectLocation::parse("https://certs/key").is_err());
/// assert!(ObjectLocation::parse("s3://certs/").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    /// Bucket name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl ObjectLocation {
    /// Creates a location.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parses an `s3://bucket/key` string.
    pub fn parse(location: &str) -> Result<Self, ArtifactError> {
        let invalid = || ArtifactError::InvalidLocation {
            location: location.to_string(),
        };
        let rest = location.strip_prefix("s3://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Key layout of chunk archives under a configured prefix.
///
/// # Examples
///
/// ```
/// use bulkcert::artifact::ArtifactLayout;
///
/// let layout = ArtifactLayout::new("bulk/");
/// assert_eq!(layout.chunk_key("t1", 3), "bulk/t1/3/certs.zip");
/// assert_eq!(layout.task_prefix("t1"), "bulk/t1/");
///
/// let bare = ArtifactLayout::new("");
/// assert_eq!(bare.chunk_key("t1", 3), "t1/3/certs.zip");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactLayout {
    prefix: String,
}

impl ArtifactLayout {
    /// Creates a layout; leading and trailing slashes on `prefix` are ignored.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Key prefix holding every artifact of a task (ends with `/`).
    pub fn task_prefix(&self, task_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{task_id}/")
        } else {
            format!("{}/{task_id}/", self.prefix)
        }
    }

    /// Canonical key of a chunk archive.
    pub fn chunk_key(&self, task_id: &str, chunk_id: u32) -> String {
        format!("{}{chunk_id}/certs.zip", self.task_prefix(task_id))
    }
}

/// Object storage holding chunk archives.
///
/// Implementations serve exactly one bucket.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// The bucket this store reads and writes.
    fn bucket(&self) -> &str;

    /// Uploads (or overwrites) an object.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), ArtifactError>;

    /// Downloads an object. A missing object is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactError>;

    /// Lists every key under `prefix`.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, ArtifactError>;

    /// Deletes the given keys in batch, returning how many were deleted.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, ArtifactError>;

    /// Produces a time-limited direct-download URL for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, ArtifactError>;

    /// Renders the location string recorded for `key`.
    fn location(&self, key: &str) -> ObjectLocation {
        ObjectLocation::new(self.bucket(), key)
    }

    /// Resolves a recorded location string to a key in this store.
    fn key_for(&self, location: &str) -> Result<String, ArtifactError> {
        let parsed = ObjectLocation::parse(location)?;
        if parsed.bucket != self.bucket() {
            return Err(ArtifactError::ForeignBucket {
                expected: self.bucket().to_string(),
                found: parsed.bucket,
            });
        }
        Ok(parsed.key)
    }
}
