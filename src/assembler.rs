//! Artifact assembly and task-wide deletion.
//!
//! Retrieval never returns a partial result: if any chunk lacks a location
//! the whole request is `NotFound`. Once every chunk has one, the task's
//! artifacts are served either as presigned links (one per chunk) or as a
//! single merged archive written to local storage.
//!
//! Every bundle retrieval writes its own uniquely named file under the
//! bundle directory. The file is removed when the returned
//! [`Artifacts::Bundle`] is dropped, so concurrent downloads of one task
//! never share a file and nothing accumulates on disk.
//!
//! A recorded location whose object has gone missing from the store makes
//! bundle retrieval answer `Ok(None)` instead of failing. Deletion removes
//! objects only; chunk records stay, so the task keeps reporting
//! `COMPLETE` against locations that no longer resolve.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempPath;

use crate::aggregator::StatusAggregator;
use crate::artifact::{merge_archives, ArtifactError, ArtifactLayout, ArtifactStore};
use crate::error::{BulkError, BulkResult};

/// How a completed task's artifacts are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Time-limited direct-download URLs, one per chunk.
    Links,
    /// One merged archive on local storage.
    Bundle,
}

/// Retrieved artifacts.
#[derive(Debug)]
pub enum Artifacts {
    /// Presigned URLs in chunk order.
    Links(Vec<String>),
    /// The merged archive. Deleted from disk on drop.
    Bundle(TempPath),
}

/// Link lifetime and bundle placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Lifetime of presigned links.
    pub link_expiry: Duration,
    /// Directory merged bundles are written to.
    pub bundle_dir: PathBuf,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            link_expiry: Duration::from_secs(3600),
            bundle_dir: std::env::temp_dir(),
        }
    }
}

/// Serves and deletes task artifacts.
#[derive(Clone)]
pub struct ArtifactAssembler {
    aggregator: StatusAggregator,
    artifacts: Arc<dyn ArtifactStore>,
    layout: ArtifactLayout,
    config: AssemblerConfig,
}

impl std::fmt::Debug for ArtifactAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactAssembler")
            .field("layout", &self.layout)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ArtifactAssembler {
    /// Creates an assembler.
    pub fn new(
        aggregator: StatusAggregator,
        artifacts: Arc<dyn ArtifactStore>,
        layout: ArtifactLayout,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            aggregator,
            artifacts,
            layout,
            config,
        }
    }

    /// Retrieves the artifacts of a completed task.
    ///
    /// # Errors
    ///
    /// `NotFound` if the task is unknown or still has pending chunks;
    /// `Upstream` if the object store fails.
    pub async fn get_artifacts(
        &self,
        task_id: &str,
        mode: RetrievalMode,
    ) -> BulkResult<Option<Artifacts>> {
        let locations = self.aggregator.locations(task_id).await?;
        let keys = locations
            .iter()
            .map(|location| self.artifacts.key_for(location))
            .collect::<Result<Vec<_>, ArtifactError>>()?;

        match mode {
            RetrievalMode::Links => {
                let mut links = Vec::with_capacity(keys.len());
                for key in &keys {
                    links.push(self.artifacts.presign_get(key, self.config.link_expiry).await?);
                }
                Ok(Some(Artifacts::Links(links)))
            },
            RetrievalMode::Bundle => {
                let mut archives = Vec::with_capacity(keys.len());
                for key in &keys {
                    match self.artifacts.get(key).await? {
                        Some(bytes) => archives.push(bytes),
                        None => {
                            tracing::warn!(task_id, key = %key, "chunk archive missing from store");
                            return Ok(None);
                        },
                    }
                }
                let merged = merge_archives(&archives)?;
                let path = self.write_bundle(task_id, merged).await?;
                tracing::info!(
                    task_id,
                    chunks = archives.len(),
                    path = %path.display(),
                    "task bundle assembled"
                );
                Ok(Some(Artifacts::Bundle(path)))
            },
        }
    }

    async fn write_bundle(&self, task_id: &str, bytes: Vec<u8>) -> BulkResult<TempPath> {
        let dir = self.config.bundle_dir.clone();
        let prefix = format!("{task_id}-");
        let written = tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".zip")
                .tempfile_in(&dir)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file.into_temp_path())
        })
        .await
        .map_err(|e| ArtifactError::backend(format!("bundle writer stopped: {e}")))?;
        Ok(written.map_err(ArtifactError::from)?)
    }

    /// Deletes every object under the task's prefix in one batch,
    /// returning how many were removed. Chunk records are left in place.
    pub async fn delete_batch(&self, task_id: &str) -> BulkResult<usize> {
        if task_id.is_empty() || task_id.contains('/') {
            return Err(BulkError::validation(format!("invalid task id: {task_id:?}")));
        }
        let prefix = self.layout.task_prefix(task_id);
        let keys = self.artifacts.list_prefix(&prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self.artifacts.delete_many(&keys).await?;
        tracing::info!(task_id, deleted, prefix = %prefix, "task artifacts deleted");
        Ok(deleted)
    }
}
