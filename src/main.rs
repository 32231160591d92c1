//! `bulkcert-server`: the bulk issuance API with an in-process worker pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bulkcert::aggregator::StatusAggregator;
use bulkcert::artifact::{ArtifactLayout, ArtifactStore, InMemoryArtifactStore};
use bulkcert::assembler::ArtifactAssembler;
use bulkcert::ca::{
    CaRegistry, LocalManagedIssuer, SecretsProvider, StaticCaDirectory, StaticSecrets,
};
use bulkcert::channel::InProcessChannel;
use bulkcert::config::Settings;
use bulkcert::http::{router, AppState};
use bulkcert::splitter::TaskSplitter;
use bulkcert::store::{ChunkStore, InMemoryBackend, StorageBackend};
use bulkcert::worker::{ChunkWorker, WorkerPool};

#[derive(Debug, Parser)]
#[command(name = "bulkcert-server")]
#[command(about = "Bulk X.509 certificate issuance server", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(long, env = "BULKCERT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "BULKCERT_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Overrides `chunk_size` from the settings file.
    #[arg(long)]
    chunk_size: Option<u32>,

    /// Overrides `worker.concurrency` from the settings file.
    #[arg(long)]
    concurrency: Option<usize>,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(chunk_size) = cli.chunk_size {
        settings.chunk_size = chunk_size;
    }
    if let Some(concurrency) = cli.concurrency {
        settings.worker.concurrency = concurrency;
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

async fn record_backend(settings: &Settings) -> Arc<dyn StorageBackend> {
    match settings.records.table_name.as_deref() {
        #[cfg(feature = "dynamodb")]
        Some(table) => {
            tracing::info!(table, "using DynamoDB chunk records");
            Arc::new(bulkcert::store::dynamodb::DynamoDbBackend::from_env_with_table(table).await)
        },
        #[cfg(not(feature = "dynamodb"))]
        Some(table) => {
            tracing::warn!(
                table,
                "built without the dynamodb feature; using in-memory chunk records"
            );
            Arc::new(InMemoryBackend::new())
        },
        None => Arc::new(InMemoryBackend::new()),
    }
}

async fn artifact_store(settings: &Settings) -> Arc<dyn ArtifactStore> {
    #[cfg(feature = "s3")]
    {
        tracing::info!(bucket = %settings.artifacts.bucket, "using S3 artifact store");
        let bucket = settings.artifacts.bucket.clone();
        Arc::new(bulkcert::artifact::s3::S3ArtifactStore::from_env(bucket).await)
    }
    #[cfg(not(feature = "s3"))]
    {
        tracing::info!(bucket = %settings.artifacts.bucket, "using in-memory artifact store");
        Arc::new(InMemoryArtifactStore::new(settings.artifacts.bucket.clone()))
    }
}

async fn secrets_provider(settings: &Settings) -> Result<Arc<dyn SecretsProvider>> {
    #[cfg(feature = "aws-secrets")]
    if settings.ca_files.keys.is_empty() {
        return Ok(Arc::new(bulkcert::ca::AwsSecretsProvider::from_env().await));
    }
    let secrets = StaticSecrets::new();
    for (name, path) in &settings.ca_files.keys {
        let pem = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read CA key {}", path.display()))?;
        secrets.insert(name.clone(), pem);
    }
    Ok(Arc::new(secrets))
}

async fn ca_registry(settings: &Settings) -> Result<CaRegistry> {
    let directory = StaticCaDirectory::new();
    for (cert_id, path) in &settings.ca_files.certificates {
        let pem = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read CA certificate {}", path.display()))?;
        directory.insert(cert_id.clone(), pem);
    }
    let managed = LocalManagedIssuer::generate("bulkcert development root")
        .context("Failed to generate the managed issuer root")?;
    Ok(CaRegistry::new(
        settings.cas.clone(),
        Arc::new(managed),
        secrets_provider(settings).await?,
        Arc::new(directory),
    ))
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl-C");
    }
    tracing::info!("shutdown requested");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let store = ChunkStore::from_arc(record_backend(&settings).await);
    let artifacts = artifact_store(&settings).await;
    let registry = Arc::new(ca_registry(&settings).await?);
    let layout = ArtifactLayout::new(&settings.artifacts.prefix);
    let (channel, receiver) = InProcessChannel::new();

    let worker = ChunkWorker::new(
        store.clone(),
        Arc::clone(&artifacts),
        Arc::clone(&registry),
        layout.clone(),
    )
    .with_default_validity_days(settings.default_validity_days);
    let cancel = CancellationToken::new();
    let pool = WorkerPool::spawn(
        Arc::new(worker),
        channel.clone(),
        receiver,
        settings.pool(),
        cancel.clone(),
    );

    let aggregator = StatusAggregator::new(store.clone());
    let state = Arc::new(AppState {
        splitter: TaskSplitter::new(
            store,
            Arc::new(channel),
            registry,
            settings.splitter(),
        ),
        assembler: ArtifactAssembler::new(
            aggregator.clone(),
            artifacts,
            layout,
            settings.assembler(),
        ),
        aggregator,
    });

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    tracing::info!(addr = %cli.bind, chunk_size = settings.chunk_size, "bulkcert server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("Server error")?;

    pool.shutdown().await;
    Ok(())
}
