//! Platform-managed CA strategy.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rcgen::{Certificate, DistinguishedName, KeyPair};

use super::{
    generate_root, new_request, sign_request, CaKind, CertificateAuthority, IssuanceError,
    IssuedCertificate,
};

/// The managed issuance capability: signs a CSR and returns the leaf PEM.
#[async_trait]
pub trait ManagedIssuer: Send + Sync {
    /// Signs `csr_pem` for `validity_days`.
    async fn sign_csr(&self, csr_pem: &str, validity_days: u32) -> Result<String, IssuanceError>;
}

/// [`CertificateAuthority`] that delegates signing to a [`ManagedIssuer`].
#[derive(Clone)]
pub struct ManagedCa {
    issuer: Arc<dyn ManagedIssuer>,
}

impl fmt::Debug for ManagedCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCa").finish_non_exhaustive()
    }
}

impl ManagedCa {
    /// Wraps an issuer.
    pub fn new(issuer: Arc<dyn ManagedIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl CertificateAuthority for ManagedCa {
    fn kind(&self) -> CaKind {
        CaKind::Managed
    }

    async fn issue(
        &self,
        subject: DistinguishedName,
        validity_days: u32,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let (key, csr_pem) = new_request(subject)?;
        let cert_pem = self.issuer.sign_csr(&csr_pem, validity_days).await?;
        Ok(IssuedCertificate {
            cert_pem,
            key_pem: key.serialize_pem(),
        })
    }
}

/// In-process managed issuer backed by a generated root.
///
/// Stands in for the platform's issuance service in the development server
/// and in tests.
pub struct LocalManagedIssuer {
    root: Certificate,
    root_key: KeyPair,
}

impl fmt::Debug for LocalManagedIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalManagedIssuer").finish_non_exhaustive()
    }
}

impl LocalManagedIssuer {
    /// Generates a fresh root named `common_name`.
    pub fn generate(common_name: &str) -> Result<Self, IssuanceError> {
        let (root, root_key) = generate_root(common_name)?;
        Ok(Self { root, root_key })
    }

    /// The root certificate, PEM.
    pub fn root_pem(&self) -> String {
        self.root.pem()
    }
}

#[async_trait]
impl ManagedIssuer for LocalManagedIssuer {
    async fn sign_csr(&self, csr_pem: &str, validity_days: u32) -> Result<String, IssuanceError> {
        sign_request(csr_pem, validity_days, &self.root, &self.root_key)
    }
}
