//! Certificate authority strategies.
//!
//! Every CA alias resolves to one [`CertificateAuthority`]:
//!
//! - [`ManagedCa`] hands each signing request to the platform's managed
//!   issuance capability ([`ManagedIssuer`]).
//! - [`CustomerCa`] signs locally with a CA key fetched from a
//!   [`SecretsProvider`] and a CA certificate fetched from a [`CaDirectory`].
//!
//! Both generate a fresh key pair and CSR per certificate. Resolution happens
//! once per chunk through [`CaRegistry::resolve`].

pub mod customer;
pub mod directory;
pub mod managed;
pub mod secrets;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::error::BulkError;

pub use customer::CustomerCa;
pub use directory::{CaDirectory, StaticCaDirectory};
pub use managed::{LocalManagedIssuer, ManagedCa, ManagedIssuer};
#[cfg(feature = "aws-secrets")]
pub use secrets::AwsSecretsProvider;
pub use secrets::{SecretsProvider, StaticSecrets};

/// Errors raised while resolving a CA or issuing a certificate.
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// The alias is not configured.
    #[error("unknown CA alias: {alias}")]
    UnknownAlias {
        /// The alias that was looked up.
        alias: String,
    },

    /// A secret could not be fetched.
    #[error("secret {name} unavailable: {message}")]
    Secret {
        /// Secret name.
        name: String,
        /// Provider message.
        message: String,
    },

    /// A CA certificate could not be fetched.
    #[error("CA certificate {cert_id} unavailable: {message}")]
    CaCertificate {
        /// Certificate id.
        cert_id: String,
        /// Directory message.
        message: String,
    },

    /// Key generation, CSR construction, or signing failed.
    #[error("signing error: {0}")]
    Signing(#[from] rcgen::Error),

    /// The requested validity period cannot be represented.
    #[error("validity of {days} days is out of range")]
    Validity {
        /// Requested days.
        days: u32,
    },

    /// The managed issuance capability rejected the request.
    #[error("managed issuer error: {message}")]
    Issuer {
        /// Issuer message.
        message: String,
    },

    /// A CA definition is incomplete.
    #[error("CA {alias} is misconfigured: {message}")]
    Misconfigured {
        /// Offending alias.
        alias: String,
        /// What is missing.
        message: String,
    },
}

impl From<IssuanceError> for BulkError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::UnknownAlias { .. } => BulkError::validation(err.to_string()),
            other => BulkError::upstream("certificate authority", other.to_string()),
        }
    }
}

/// Which strategy an alias resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaKind {
    /// Platform default CA, issuing through the managed capability.
    #[default]
    Managed,
    /// Customer-supplied CA, signing locally.
    Customer,
}

impl fmt::Display for CaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::Customer => write!(f, "customer"),
        }
    }
}

/// Configuration of one CA alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaDefinition {
    /// Alias used in request routes.
    pub alias: String,
    /// Strategy.
    #[serde(default)]
    pub kind: CaKind,
    /// Append the CA certificate to every leaf PEM (customer CAs only).
    #[serde(default)]
    pub include_ca: bool,
    /// Secret holding the PEM private key (customer CAs).
    #[serde(default)]
    pub key_secret: Option<String>,
    /// Directory id of the CA certificate (customer CAs).
    #[serde(default)]
    pub cert_id: Option<String>,
}

impl CaDefinition {
    /// A managed-CA definition.
    pub fn managed(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            kind: CaKind::Managed,
            include_ca: false,
            key_secret: None,
            cert_id: None,
        }
    }

    /// A customer-CA definition.
    pub fn customer(
        alias: impl Into<String>,
        key_secret: impl Into<String>,
        cert_id: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            kind: CaKind::Customer,
            include_ca: false,
            key_secret: Some(key_secret.into()),
            cert_id: Some(cert_id.into()),
        }
    }
}

/// A freshly issued leaf certificate and its private key.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// Leaf certificate, PEM.
    pub cert_pem: String,
    /// Leaf private key, PKCS#8 PEM.
    pub key_pem: String,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Issues one certificate per call.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// The strategy behind this CA.
    fn kind(&self) -> CaKind;

    /// The CA certificate PEM, when it may be bundled with leaves.
    fn ca_certificate_pem(&self) -> Option<&str> {
        None
    }

    /// Generates a key pair and CSR for `subject` and returns the signed leaf.
    async fn issue(
        &self,
        subject: DistinguishedName,
        validity_days: u32,
    ) -> Result<IssuedCertificate, IssuanceError>;
}

/// Generates a key pair and a PEM CSR for `subject`.
pub(crate) fn new_request(subject: DistinguishedName) -> Result<(KeyPair, String), IssuanceError> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name = subject;
    let csr_pem = params.serialize_request(&key)?.pem()?;
    Ok((key, csr_pem))
}

/// Signs a PEM CSR as an end-entity certificate valid from now for
/// `validity_days`.
pub(crate) fn sign_request(
    csr_pem: &str,
    validity_days: u32,
    issuer: &Certificate,
    issuer_key: &KeyPair,
) -> Result<String, IssuanceError> {
    let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)?;
    let now = OffsetDateTime::now_utc();
    csr.params.not_before = now;
    csr.params.not_after = now
        .checked_add(time::Duration::days(i64::from(validity_days.max(1))))
        .ok_or(IssuanceError::Validity {
            days: validity_days,
        })?;
    csr.params.is_ca = IsCa::ExplicitNoCa;
    csr.params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    Ok(csr.signed_by(issuer, issuer_key)?.pem())
}

/// Generates a self-signed root CA certificate and key.
///
/// Used by [`LocalManagedIssuer`] and for standing up development customer
/// CAs.
pub fn generate_root(common_name: &str) -> Result<(Certificate, KeyPair), IssuanceError> {
    let key = KeyPair::generate()?;
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(3650);
    let cert = params.self_signed(&key)?;
    Ok((cert, key))
}

/// Alias-to-strategy resolution.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bulkcert::ca::{
///     CaDefinition, CaKind, CaRegistry, LocalManagedIssuer, StaticCaDirectory, StaticSecrets,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let registry = CaRegistry::new(
///     [CaDefinition::managed("default")],
///     Arc::new(LocalManagedIssuer::generate("Dev Root").unwrap()),
///     Arc::new(StaticSecrets::new()),
///     Arc::new(StaticCaDirectory::new()),
/// );
/// assert!(registry.contains("default"));
/// assert!(!registry.contains("acme"));
/// let ca = registry.resolve("default").await.unwrap();
/// assert_eq!(ca.kind(), CaKind::Managed);
/// # }
/// ```
#[derive(Clone)]
pub struct CaRegistry {
    definitions: HashMap<String, CaDefinition>,
    managed: Arc<dyn ManagedIssuer>,
    secrets: Arc<dyn SecretsProvider>,
    directory: Arc<dyn CaDirectory>,
}

impl fmt::Debug for CaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut aliases: Vec<&String> = self.definitions.keys().collect();
        aliases.sort();
        f.debug_struct("CaRegistry")
            .field("aliases", &aliases)
            .finish()
    }
}

impl CaRegistry {
    /// Creates a registry. A later definition replaces an earlier one with
    /// the same alias.
    pub fn new(
        definitions: impl IntoIterator<Item = CaDefinition>,
        managed: Arc<dyn ManagedIssuer>,
        secrets: Arc<dyn SecretsProvider>,
        directory: Arc<dyn CaDirectory>,
    ) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|definition| (definition.alias.clone(), definition))
                .collect(),
            managed,
            secrets,
            directory,
        }
    }

    /// Returns `true` if `alias` is configured.
    pub fn contains(&self, alias: &str) -> bool {
        self.definitions.contains_key(alias)
    }

    /// The definition behind `alias`.
    pub fn definition(&self, alias: &str) -> Result<&CaDefinition, IssuanceError> {
        self.definitions
            .get(alias)
            .ok_or_else(|| IssuanceError::UnknownAlias {
                alias: alias.to_string(),
            })
    }

    /// Builds the strategy for `alias`.
    ///
    /// Customer CAs fetch their key and certificate on every call.
    pub async fn resolve(
        &self,
        alias: &str,
    ) -> Result<Box<dyn CertificateAuthority>, IssuanceError> {
        let definition = self.definition(alias)?;
        match definition.kind {
            CaKind::Managed => Ok(Box::new(ManagedCa::new(Arc::clone(&self.managed)))),
            CaKind::Customer => {
                let missing = |field: &str| IssuanceError::Misconfigured {
                    alias: alias.to_string(),
                    message: format!("{field} is required for customer CAs"),
                };
                let key_secret = definition
                    .key_secret
                    .as_deref()
                    .ok_or_else(|| missing("key_secret"))?;
                let cert_id = definition
                    .cert_id
                    .as_deref()
                    .ok_or_else(|| missing("cert_id"))?;
                let ca = CustomerCa::load(
                    self.secrets.as_ref(),
                    self.directory.as_ref(),
                    key_secret,
                    cert_id,
                )
                .await?;
                tracing::debug!(alias, cert_id, "customer CA loaded");
                Ok(Box::new(ca))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(definitions: Vec<CaDefinition>) -> CaRegistry {
        CaRegistry::new(
            definitions,
            Arc::new(LocalManagedIssuer::generate("Test Root").unwrap()),
            Arc::new(StaticSecrets::new()),
            Arc::new(StaticCaDirectory::new()),
        )
    }

    #[tokio::test]
    async fn unknown_alias_is_validation_error() {
        let registry = registry(vec![CaDefinition::managed("default")]);
        let err = registry.resolve("nope").await.err().unwrap();
        assert!(matches!(err, IssuanceError::UnknownAlias { .. }));
        assert_eq!(BulkError::from(err).status_code(), 400);
    }

    #[tokio::test]
    async fn customer_without_secret_is_misconfigured() {
        let mut definition = CaDefinition::customer("acme", "k", "c");
        definition.key_secret = None;
        let registry = registry(vec![definition]);
        let err = registry.resolve("acme").await.err().unwrap();
        assert!(matches!(err, IssuanceError::Misconfigured { .. }));
        assert_eq!(BulkError::from(err).status_code(), 502);
    }

    #[tokio::test]
    async fn customer_with_missing_secret_is_upstream() {
        let registry = registry(vec![CaDefinition::customer("acme", "k", "c")]);
        let err = registry.resolve("acme").await.err().unwrap();
        assert!(matches!(err, IssuanceError::Secret { .. }));
    }

    #[test]
    fn definition_deserializes_with_defaults() {
        let definition: CaDefinition = toml::from_str(r#"alias = "default""#).unwrap();
        assert_eq!(definition, CaDefinition::managed("default"));
    }

    #[test]
    fn request_and_sign_produce_leaf() {
        let (root, root_key) = generate_root("Root").unwrap();
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, "leaf");
        let (_key, csr_pem) = new_request(subject).unwrap();
        assert!(csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        let cert_pem = sign_request(&csr_pem, 30, &root, &root_key).unwrap();
        assert!(cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn oversized_validity_is_an_error() {
        let (root, root_key) = generate_root("Root").unwrap();
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, "leaf");
        let (_key, csr_pem) = new_request(subject).unwrap();
        let err = sign_request(&csr_pem, u32::MAX, &root, &root_key).unwrap_err();
        assert!(matches!(err, IssuanceError::Validity { days: u32::MAX }));
        assert_eq!(BulkError::from(err).status_code(), 502);
    }
}
