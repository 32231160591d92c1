//! Server settings, loaded from TOML.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration with one managed CA aliased `default`.
//!
//! ```toml
//! chunk_size = 50
//! max_quantity = 100000
//! default_validity_days = 365
//!
//! [worker]
//! concurrency = 4
//! max_deliveries = 5
//! redelivery_delay_ms = 1000
//!
//! [artifacts]
//! bucket = "bulk-certificates"
//! prefix = "bulk"
//! link_expiry_secs = 3600
//!
//! [[cas]]
//! alias = "acme"
//! kind = "customer"
//! include_ca = true
//! key_secret = "acme/ca-key"
//! cert_id = "acme-root"
//!
//! [ca_files.keys]
//! "acme/ca-key" = "/etc/bulkcert/acme-key.pem"
//!
//! [ca_files.certificates]
//! acme-root = "/etc/bulkcert/acme-root.pem"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assembler::AssemblerConfig;
use crate::ca::{CaDefinition, CaKind};
use crate::splitter::{
    SplitterConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_QUANTITY, MAX_VALIDITY_DAYS,
};
use crate::worker::{PoolConfig, DEFAULT_VALIDITY_DAYS};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`Settings`].
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// The settings parse but are inconsistent.
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Concurrent chunk consumers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Deliveries of one message before it is dropped.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    /// Delay before a failed message is redelivered.
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_deliveries: default_max_deliveries(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
        }
    }
}

/// Artifact store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSettings {
    /// Bucket holding chunk archives.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Key prefix under the bucket.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Presigned link lifetime, seconds.
    #[serde(default = "default_link_expiry_secs")]
    pub link_expiry_secs: u64,
    /// Where merged bundles are written. Defaults to the system temp dir.
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            prefix: default_prefix(),
            link_expiry_secs: default_link_expiry_secs(),
            bundle_dir: None,
        }
    }
}

/// Chunk record store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSettings {
    /// DynamoDB table; the in-memory store is used when unset.
    #[serde(default)]
    pub table_name: Option<String>,
}

/// Local PEM files standing in for the secrets and CA directory services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaFileSettings {
    /// Secret name to PEM private key file.
    #[serde(default)]
    pub keys: BTreeMap<String, PathBuf>,
    /// CA certificate id to PEM certificate file.
    #[serde(default)]
    pub certificates: BTreeMap<String, PathBuf>,
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Certificates per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Largest accepted request.
    #[serde(default = "default_max_quantity")]
    pub max_quantity: u32,
    /// Validity when a template sets none.
    #[serde(default = "default_validity_days")]
    pub default_validity_days: u32,
    /// Worker pool.
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Artifact store.
    #[serde(default)]
    pub artifacts: ArtifactSettings,
    /// Chunk record store.
    #[serde(default)]
    pub records: RecordSettings,
    /// CA aliases.
    #[serde(default = "default_cas")]
    pub cas: Vec<CaDefinition>,
    /// File-backed CA keys and certificates.
    #[serde(default)]
    pub ca_files: CaFileSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_quantity: default_max_quantity(),
            default_validity_days: default_validity_days(),
            worker: WorkerSettings::default(),
            artifacts: ArtifactSettings::default(),
            records: RecordSettings::default(),
            cas: default_cas(),
            ca_files: CaFileSettings::default(),
        }
    }
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_quantity() -> u32 {
    DEFAULT_MAX_QUANTITY
}

fn default_validity_days() -> u32 {
    DEFAULT_VALIDITY_DAYS
}

fn default_concurrency() -> usize {
    4
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_redelivery_delay_ms() -> u64 {
    1000
}

fn default_bucket() -> String {
    "bulk-certificates".to_string()
}

fn default_prefix() -> String {
    "bulk".to_string()
}

fn default_link_expiry_secs() -> u64 {
    3600
}

fn default_cas() -> Vec<CaDefinition> {
    vec![CaDefinition::managed("default")]
}

impl Settings {
    /// Parses and validates settings from a TOML string.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses, and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero".into()));
        }
        if self.max_quantity == 0 {
            return Err(ConfigError::Invalid("max_quantity must be greater than zero".into()));
        }
        if self.default_validity_days == 0 || self.default_validity_days > MAX_VALIDITY_DAYS {
            return Err(ConfigError::Invalid(format!(
                "default_validity_days must be between 1 and {MAX_VALIDITY_DAYS}"
            )));
        }
        let mut aliases = HashSet::new();
        for ca in &self.cas {
            if ca.alias.trim().is_empty() {
                return Err(ConfigError::Invalid("CA alias must not be empty".into()));
            }
            if !aliases.insert(ca.alias.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate CA alias: {}", ca.alias)));
            }
            if ca.kind == CaKind::Customer && (ca.key_secret.is_none() || ca.cert_id.is_none()) {
                return Err(ConfigError::Invalid(format!(
                    "customer CA {} needs key_secret and cert_id",
                    ca.alias
                )));
            }
        }
        Ok(())
    }

    /// Splitter limits.
    pub fn splitter(&self) -> SplitterConfig {
        SplitterConfig {
            chunk_size: self.chunk_size,
            max_quantity: self.max_quantity,
        }
    }

    /// Worker pool policy.
    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            concurrency: self.worker.concurrency,
            max_deliveries: self.worker.max_deliveries,
            redelivery_delay: Duration::from_millis(self.worker.redelivery_delay_ms),
        }
    }

    /// Assembler link lifetime and bundle directory.
    pub fn assembler(&self) -> AssemblerConfig {
        AssemblerConfig {
            link_expiry: Duration::from_secs(self.artifacts.link_expiry_secs),
            bundle_dir: self
                .artifacts
                .bundle_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}
