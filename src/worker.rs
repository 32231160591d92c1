//! Chunk workers and the pool that drives them.
//!
//! [`ChunkWorker::process`] turns one [`WorkMessage`] into one archive:
//! resolve the CA, issue `quantity` certificates one at a time, bundle them,
//! upload the bundle to the chunk's canonical key, then mark the chunk
//! record `Complete`. Any failure aborts the chunk before the record write,
//! so no partial archive is ever recorded.
//!
//! Upload and record update are separate steps. A failure after the upload
//! leaves an orphaned object and a `Pending` chunk; redelivery overwrites
//! the object at the same key.
//!
//! [`WorkerPool`] runs `concurrency` consumers over one
//! [`DeliveryReceiver`]. A failed delivery is put back on the channel after
//! a delay; one that has failed `max_deliveries` times is dropped with an
//! error event. Each chunk runs in its own task, so a panic while issuing
//! counts as a failed delivery and the consumer keeps going.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::artifact::{ArtifactLayout, ArtifactStore, ChunkArchive};
use crate::ca::{CaKind, CaRegistry};
use crate::channel::{Delivery, DeliveryReceiver, InProcessChannel};
use crate::domain::WorkMessage;
use crate::error::{BulkError, BulkResult};
use crate::store::ChunkStore;
use crate::subject::SubjectGenerator;

/// Default certificate validity when the template sets none.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Lowercase hex SHA-256 of a PEM certificate's DER body.
///
/// # Examples
///
/// ```
/// let pem = "-----BEGIN CERTIFICATE-----\nAAEC\n-----END CERTIFICATE-----\n";
/// let id = bulkcert::worker::fingerprint(pem).unwrap();
/// assert_eq!(id.len(), 64);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
/// ```
pub fn fingerprint(cert_pem: &str) -> BulkResult<String> {
    let block = pem::parse(cert_pem).map_err(|e| {
        BulkError::upstream("certificate authority", format!("unparseable certificate: {e}"))
    })?;
    Ok(hex::encode(Sha256::digest(block.contents())))
}

/// Processes one chunk at a time.
#[derive(Clone)]
pub struct ChunkWorker {
    store: ChunkStore,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<CaRegistry>,
    layout: ArtifactLayout,
    default_validity_days: u32,
}

impl std::fmt::Debug for ChunkWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWorker")
            .field("layout", &self.layout)
            .field("default_validity_days", &self.default_validity_days)
            .finish_non_exhaustive()
    }
}

impl ChunkWorker {
    /// Creates a worker.
    pub fn new(
        store: ChunkStore,
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<CaRegistry>,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            store,
            artifacts,
            registry,
            layout,
            default_validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    /// Overrides the validity used when the template sets none.
    pub fn with_default_validity_days(mut self, days: u32) -> Self {
        self.default_validity_days = days.max(1);
        self
    }

    /// Issues, bundles, uploads, and completes one chunk. Returns the
    /// recorded location.
    pub async fn process(&self, message: &WorkMessage) -> BulkResult<String> {
        let span = tracing::info_span!(
            "chunk",
            task_id = %message.task_id,
            chunk_id = message.chunk_id,
            quantity = message.quantity
        );
        self.issue_and_store(message).instrument(span).await
    }

    async fn issue_and_store(&self, message: &WorkMessage) -> BulkResult<String> {
        let include_ca =
            message.cert_info.include_ca || self.registry.definition(&message.ca_alias)?.include_ca;
        let ca = self.registry.resolve(&message.ca_alias).await?;
        let generator = SubjectGenerator::new(&message.cert_info)?;
        let validity_days = message
            .cert_info
            .validity_days
            .unwrap_or(self.default_validity_days);
        let chain = ca.ca_certificate_pem().filter(|_| include_ca);

        let mut archive = ChunkArchive::new(ca.kind() == CaKind::Customer);
        for i in 0..message.quantity {
            let index = message.offset + u64::from(i);
            let (name, subject) = generator.distinguished_name(index)?;
            let issued = ca.issue(subject, validity_days).await?;
            let id = fingerprint(&issued.cert_pem)?;
            let cert_pem = match chain {
                Some(ca_pem) => format!("{}\n{ca_pem}\n", issued.cert_pem.trim_end()),
                None => issued.cert_pem,
            };
            archive.add_certificate(&name, &id, &cert_pem, &issued.key_pem)?;
        }
        let bytes = archive.finish()?;

        let key = self.layout.chunk_key(&message.task_id, message.chunk_id);
        let size = bytes.len();
        self.artifacts.put(&key, bytes).await?;
        tracing::debug!(key = %key, size, "chunk archive uploaded");

        let location = self.artifacts.location(&key).to_string();
        self.store
            .mark_complete(&message.task_id, message.chunk_id, &location)
            .await?;
        Ok(location)
    }
}

/// Pool sizing and redelivery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Concurrent consumers.
    pub concurrency: usize,
    /// Deliveries of one message before it is dropped.
    pub max_deliveries: u32,
    /// Wait before a failed message is put back.
    pub redelivery_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_deliveries: 5,
            redelivery_delay: Duration::from_millis(1000),
        }
    }
}

/// Running consumers.
///
/// Cancelling the token stops every consumer once its current chunk is
/// done; queued messages stay queued.
#[derive(Debug)]
pub struct WorkerPool {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawns `config.concurrency` consumers on the current runtime.
    pub fn spawn(
        worker: Arc<ChunkWorker>,
        channel: InProcessChannel,
        receiver: DeliveryReceiver,
        config: PoolConfig,
        cancel: CancellationToken,
    ) -> Self {
        let tracker = TaskTracker::new();
        for consumer in 0..config.concurrency.max(1) {
            tracker.spawn(consume(
                consumer,
                Arc::clone(&worker),
                channel.clone(),
                receiver.clone(),
                config,
                cancel.clone(),
                tracker.clone(),
            ));
        }
        tracing::info!(concurrency = config.concurrency.max(1), "worker pool started");
        Self { tracker, cancel }
    }

    /// Stops the pool and waits for in-flight chunks to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("worker pool stopped");
    }
}

async fn consume(
    consumer: usize,
    worker: Arc<ChunkWorker>,
    channel: InProcessChannel,
    receiver: DeliveryReceiver,
    config: PoolConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        let attempt = {
            let worker = Arc::clone(&worker);
            let message = delivery.message.clone();
            tokio::spawn(async move { worker.process(&message).await }).await
        };
        let err = match attempt {
            Ok(Ok(_)) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(join) => format!("chunk task aborted: {join}"),
        };

        if delivery.attempt >= config.max_deliveries {
            tracing::error!(
                consumer,
                task_id = %delivery.message.task_id,
                chunk_id = delivery.message.chunk_id,
                attempt = delivery.attempt,
                error = %err,
                "chunk dropped after final delivery"
            );
            continue;
        }
        tracing::warn!(
            consumer,
            task_id = %delivery.message.task_id,
            chunk_id = delivery.message.chunk_id,
            attempt = delivery.attempt,
            error = %err,
            "chunk failed; scheduling redelivery"
        );
        tracker.spawn(redeliver_later(
            channel.clone(),
            delivery,
            config.redelivery_delay,
            cancel.clone(),
        ));
    }
}

async fn redeliver_later(
    channel: InProcessChannel,
    delivery: Delivery,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {},
        _ = cancel.cancelled() => return,
    }
    let task_id = delivery.message.task_id.clone();
    let chunk_id = delivery.message.chunk_id;
    if let Err(err) = channel.redeliver(delivery) {
        tracing::error!(task_id = %task_id, chunk_id, error = %err, "redelivery failed");
    }
}
