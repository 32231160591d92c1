//! Shared in-memory wiring for integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::sync::Arc;

use bulkcert::aggregator::StatusAggregator;
use bulkcert::artifact::{ArtifactLayout, InMemoryArtifactStore};
use bulkcert::assembler::{ArtifactAssembler, AssemblerConfig};
use bulkcert::ca::{
    generate_root, CaDefinition, CaRegistry, LocalManagedIssuer, ManagedIssuer, StaticCaDirectory,
    StaticSecrets,
};
use bulkcert::channel::{DeliveryReceiver, InProcessChannel};
use bulkcert::domain::{CertInfo, NameGenerator};
use bulkcert::splitter::{SplitterConfig, TaskSplitter};
use bulkcert::store::{ChunkStore, InMemoryBackend};
use bulkcert::worker::ChunkWorker;
use tempfile::TempDir;

pub const BUCKET: &str = "test-certs";
pub const PREFIX: &str = "bulk";
pub const CUSTOMER_ROOT_CN: &str = "Acme Test Root";

pub struct Harness {
    pub backend: Arc<InMemoryBackend>,
    pub store: ChunkStore,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub registry: Arc<CaRegistry>,
    pub channel: InProcessChannel,
    pub receiver: DeliveryReceiver,
    pub splitter: TaskSplitter,
    pub worker: ChunkWorker,
    pub aggregator: StatusAggregator,
    pub assembler: ArtifactAssembler,
    pub customer_root_pem: String,
    pub bundle_dir: TempDir,
}

impl Harness {
    pub fn new(chunk_size: u32) -> Self {
        Self::with_config(SplitterConfig {
            chunk_size,
            max_quantity: 10_000,
        })
    }

    pub fn with_config(config: SplitterConfig) -> Self {
        let managed = LocalManagedIssuer::generate("Managed Test Root").unwrap();
        Self::with_parts(config, Arc::new(managed))
    }

    /// Harness whose `default` alias signs through `managed`.
    pub fn with_managed(chunk_size: u32, managed: Arc<dyn ManagedIssuer>) -> Self {
        Self::with_parts(
            SplitterConfig {
                chunk_size,
                max_quantity: 10_000,
            },
            managed,
        )
    }

    fn with_parts(config: SplitterConfig, managed: Arc<dyn ManagedIssuer>) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ChunkStore::from_arc(backend.clone());
        let artifacts = Arc::new(InMemoryArtifactStore::new(BUCKET));

        let (root, root_key) = generate_root(CUSTOMER_ROOT_CN).unwrap();
        let secrets = StaticSecrets::new();
        secrets.insert("acme/ca-key", root_key.serialize_pem());
        let directory = StaticCaDirectory::new();
        directory.insert("acme-root", root.pem());

        let mut acme = CaDefinition::customer("acme", "acme/ca-key", "acme-root");
        acme.include_ca = false;
        let registry = Arc::new(CaRegistry::new(
            [CaDefinition::managed("default"), acme],
            managed,
            Arc::new(secrets),
            Arc::new(directory),
        ));

        let (channel, receiver) = InProcessChannel::new();
        let layout = ArtifactLayout::new(PREFIX);
        let splitter = TaskSplitter::new(
            store.clone(),
            Arc::new(channel.clone()),
            Arc::clone(&registry),
            config,
        );
        let worker = ChunkWorker::new(
            store.clone(),
            artifacts.clone(),
            Arc::clone(&registry),
            layout.clone(),
        );
        let aggregator = StatusAggregator::new(store.clone());
        let bundle_dir = TempDir::new().unwrap();
        let assembler = ArtifactAssembler::new(
            aggregator.clone(),
            artifacts.clone(),
            layout,
            AssemblerConfig {
                bundle_dir: bundle_dir.path().to_path_buf(),
                ..AssemblerConfig::default()
            },
        );

        Self {
            backend,
            store,
            artifacts,
            registry,
            channel,
            receiver,
            splitter,
            worker,
            aggregator,
            assembler,
            customer_root_pem: root.pem(),
            bundle_dir,
        }
    }

    /// Processes every queued message, returning how many were handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(delivery) = self.receiver.try_recv() {
            self.worker.process(&delivery.message).await.unwrap();
            handled += 1;
        }
        handled
    }

    /// Discards every queued message.
    pub fn discard_queue(&self) -> usize {
        let mut discarded = 0;
        while self.receiver.try_recv().is_some() {
            discarded += 1;
        }
        discarded
    }
}

pub fn increment_template(prefix: &str, start: &str) -> CertInfo {
    CertInfo {
        country: Some("US".to_string()),
        organization: Some("Example Devices".to_string()),
        common_name_prefix: Some(prefix.to_string()),
        common_name_generator: NameGenerator::Increment,
        common_name_start: Some(start.to_string()),
        ..CertInfo::default()
    }
}

pub fn static_template(name: &str) -> CertInfo {
    CertInfo {
        common_name: Some(name.to_string()),
        ..CertInfo::default()
    }
}

pub fn zip_entries(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn zip_read(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    contents
}
