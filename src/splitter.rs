//! Task splitter: validates a bulk request, partitions it into chunks,
//! persists one `Pending` record per chunk and publishes one work message
//! per chunk.
//!
//! # Non-atomic write-then-publish
//!
//! For each chunk the record write and the publish are separate steps. A
//! failure between them leaves a durable `Pending` chunk with no message in
//! flight. The splitter does not heal this on its own;
//! [`TaskSplitter::replay_pending`] is the operator-invoked repair.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ca::CaRegistry;
use crate::channel::WorkChannel;
use crate::domain::{now_millis, CertInfo, ChunkRecord, TaskAccepted};
use crate::error::{BulkError, BulkResult};
use crate::store::ChunkStore;
use crate::subject::SubjectGenerator;

/// Default number of certificates per chunk.
pub const DEFAULT_CHUNK_SIZE: u32 = 50;

/// Default ceiling on a single request.
pub const DEFAULT_MAX_QUANTITY: u32 = 100_000;

/// Longest certificate validity a request may ask for, about a century.
pub const MAX_VALIDITY_DAYS: u32 = 36_500;

/// One planned chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    /// 1-based chunk id.
    pub chunk_id: u32,
    /// Certificates in this chunk.
    pub quantity: u32,
    /// Task-wide index of the chunk's first certificate.
    pub offset: u64,
}

/// Partitions `quantity` into `ceil(quantity / chunk_size)` chunks.
///
/// Every chunk holds `chunk_size` certificates except the last, which takes
/// the remainder when the division is uneven.
///
/// # Examples
///
/// ```
/// use bulkcert::splitter::plan_chunks;
///
/// let plan = plan_chunks(1015, 50);
/// assert_eq!(plan.len(), 21);
/// assert_eq!(plan[19].quantity, 50);
/// assert_eq!(plan[20].quantity, 15);
/// assert_eq!(plan[20].offset, 1000);
///
/// assert!(plan_chunks(0, 50).is_empty());
/// ```
pub fn plan_chunks(quantity: u32, chunk_size: u32) -> Vec<ChunkPlan> {
    if quantity == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let total = quantity.div_ceil(chunk_size);
    (1..=total)
        .map(|chunk_id| {
            let offset = u64::from(chunk_id - 1) * u64::from(chunk_size);
            let remaining = u64::from(quantity) - offset;
            ChunkPlan {
                chunk_id,
                quantity: remaining.min(u64::from(chunk_size)) as u32,
                offset,
            }
        })
        .collect()
}

/// A bulk issuance request.
///
/// `quantity` is signed so that a negative value is a validation error
/// rather than a decoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    /// Certificates requested.
    pub quantity: i64,
    /// CA alias.
    pub ca_alias: String,
    /// Subject template.
    #[serde(default)]
    pub cert_info: CertInfo,
}

/// Splitter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    /// Certificates per chunk.
    pub chunk_size: u32,
    /// Largest accepted quantity.
    pub max_quantity: u32,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_quantity: DEFAULT_MAX_QUANTITY,
        }
    }
}

/// Accepts bulk requests and fans them out as chunk work.
#[derive(Clone)]
pub struct TaskSplitter {
    store: ChunkStore,
    channel: Arc<dyn WorkChannel>,
    registry: Arc<CaRegistry>,
    config: SplitterConfig,
}

impl std::fmt::Debug for TaskSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSplitter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskSplitter {
    /// Creates a splitter.
    pub fn new(
        store: ChunkStore,
        channel: Arc<dyn WorkChannel>,
        registry: Arc<CaRegistry>,
        config: SplitterConfig,
    ) -> Self {
        Self {
            store,
            channel,
            registry,
            config,
        }
    }

    /// The limits this splitter enforces.
    pub fn config(&self) -> SplitterConfig {
        self.config
    }

    fn validate(&self, request: &BulkRequest) -> BulkResult<u32> {
        if request.quantity <= 0 {
            return Err(BulkError::validation("quantity must be greater than zero"));
        }
        let quantity = u32::try_from(request.quantity)
            .ok()
            .filter(|q| *q <= self.config.max_quantity)
            .ok_or_else(|| {
                BulkError::validation(format!(
                    "quantity {} exceeds the maximum of {}",
                    request.quantity, self.config.max_quantity
                ))
            })?;
        if request.ca_alias.trim().is_empty() {
            return Err(BulkError::validation("caAlias must not be empty"));
        }
        if !self.registry.contains(&request.ca_alias) {
            return Err(BulkError::validation(format!(
                "unknown CA alias: {}",
                request.ca_alias
            )));
        }
        match request.cert_info.validity_days {
            Some(0) => {
                return Err(BulkError::validation("validityDays must be greater than zero"));
            },
            Some(days) if days > MAX_VALIDITY_DAYS => {
                return Err(BulkError::validation(format!(
                    "validityDays {days} exceeds the maximum of {MAX_VALIDITY_DAYS}"
                )));
            },
            _ => {},
        }
        SubjectGenerator::new(&request.cert_info)?.ensure_capacity(u64::from(quantity))?;
        Ok(quantity)
    }

    /// Validates, writes every chunk record, and publishes every message.
    ///
    /// Validation failures return before any write. A store or channel
    /// failure part-way through returns the error; chunks already written
    /// stay in the store.
    pub async fn submit(&self, request: BulkRequest) -> BulkResult<TaskAccepted> {
        let quantity = self.validate(&request)?;
        let plan = plan_chunks(quantity, self.config.chunk_size);
        let task_id = Uuid::new_v4().to_string();
        let batch_date = now_millis();

        for chunk in &plan {
            let record = ChunkRecord::pending(
                task_id.as_str(),
                chunk.chunk_id,
                chunk.quantity,
                chunk.offset,
                batch_date,
                request.ca_alias.as_str(),
                request.cert_info.clone(),
            );
            self.store.create_pending(&record).await?;
            self.channel.publish(&record.to_message()).await?;
        }

        tracing::info!(
            task_id = %task_id,
            quantity,
            chunks_total = plan.len(),
            ca_alias = %request.ca_alias,
            "bulk task accepted"
        );
        Ok(TaskAccepted {
            task_id,
            batch_date,
            chunks_total: plan.len(),
        })
    }

    /// Re-publishes a work message for every chunk of `task_id` that is
    /// still `Pending`, returning how many were published.
    pub async fn replay_pending(&self, task_id: &str) -> BulkResult<usize> {
        let records = self.store.list_task(task_id).await?;
        if records.is_empty() {
            return Err(BulkError::not_found(task_id, "no chunk records"));
        }
        let mut republished = 0;
        for record in records.iter().filter(|r| !r.is_complete()) {
            self.channel.publish(&record.to_message()).await?;
            republished += 1;
        }
        tracing::info!(task_id, republished, "pending chunks replayed");
        Ok(republished)
    }
}
