//! CA description lookup: fetch-by-id of a CA's public certificate.

use async_trait::async_trait;
use dashmap::DashMap;

use super::IssuanceError;

/// Resolves a CA certificate id to its PEM.
#[async_trait]
pub trait CaDirectory: Send + Sync {
    /// Returns the PEM certificate registered under `cert_id`.
    async fn certificate_pem(&self, cert_id: &str) -> Result<String, IssuanceError>;
}

/// In-memory CA directory.
#[derive(Debug, Default)]
pub struct StaticCaDirectory {
    certificates: DashMap<String, String>,
}

impl StaticCaDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a CA certificate.
    pub fn insert(&self, cert_id: impl Into<String>, pem: impl Into<String>) {
        self.certificates.insert(cert_id.into(), pem.into());
    }
}

#[async_trait]
impl CaDirectory for StaticCaDirectory {
    async fn certificate_pem(&self, cert_id: &str) -> Result<String, IssuanceError> {
        self.certificates
            .get(cert_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| IssuanceError::CaCertificate {
                cert_id: cert_id.to_string(),
                message: "not registered".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_by_id() {
        let directory = StaticCaDirectory::new();
        directory.insert("ca-1", "PEM");
        assert_eq!(directory.certificate_pem("ca-1").await.unwrap(), "PEM");
        assert!(matches!(
            directory.certificate_pem("ca-2").await,
            Err(IssuanceError::CaCertificate { .. })
        ));
    }
}
