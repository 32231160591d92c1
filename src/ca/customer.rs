//! Customer-supplied CA strategy: local signing with a fetched CA key.

use std::fmt;

use async_trait::async_trait;
use rcgen::{Certificate, CertificateParams, DistinguishedName, KeyPair};
use secrecy::ExposeSecret;

use super::{
    new_request, sign_request, CaDirectory, CaKind, CertificateAuthority, IssuanceError,
    IssuedCertificate, SecretsProvider,
};

/// A customer CA loaded for one chunk.
pub struct CustomerCa {
    issuer: Certificate,
    issuer_key: KeyPair,
    ca_pem: String,
}

impl fmt::Debug for CustomerCa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerCa")
            .field("ca_pem", &self.ca_pem)
            .finish_non_exhaustive()
    }
}

impl CustomerCa {
    /// Fetches the CA key from `secrets` and the CA certificate from
    /// `directory`.
    pub async fn load(
        secrets: &dyn SecretsProvider,
        directory: &dyn CaDirectory,
        key_secret: &str,
        cert_id: &str,
    ) -> Result<Self, IssuanceError> {
        let key_pem = secrets.get_secret(key_secret).await?;
        let ca_pem = directory.certificate_pem(cert_id).await?;
        Self::from_pem(key_pem.expose_secret(), &ca_pem)
    }

    /// Builds the CA from its PEM key and certificate.
    pub fn from_pem(key_pem: &str, ca_pem: &str) -> Result<Self, IssuanceError> {
        let issuer_key = KeyPair::from_pem(key_pem)?;
        let issuer = CertificateParams::from_ca_cert_pem(ca_pem)?.self_signed(&issuer_key)?;
        Ok(Self {
            issuer,
            issuer_key,
            ca_pem: ca_pem.trim_end().to_string(),
        })
    }
}

#[async_trait]
impl CertificateAuthority for CustomerCa {
    fn kind(&self) -> CaKind {
        CaKind::Customer
    }

    fn ca_certificate_pem(&self) -> Option<&str> {
        Some(&self.ca_pem)
    }

    async fn issue(
        &self,
        subject: DistinguishedName,
        validity_days: u32,
    ) -> Result<IssuedCertificate, IssuanceError> {
        let (key, csr_pem) = new_request(subject)?;
        let cert_pem = sign_request(&csr_pem, validity_days, &self.issuer, &self.issuer_key)?;
        Ok(IssuedCertificate {
            cert_pem,
            key_pem: key.serialize_pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{generate_root, StaticCaDirectory, StaticSecrets};
    use rcgen::DnType;

    #[tokio::test]
    async fn load_and_issue() {
        let (root, root_key) = generate_root("Acme Root").unwrap();
        let secrets = StaticSecrets::new();
        secrets.insert("acme/key", root_key.serialize_pem());
        let directory = StaticCaDirectory::new();
        directory.insert("acme-ca", root.pem());

        let ca = CustomerCa::load(&secrets, &directory, "acme/key", "acme-ca")
            .await
            .unwrap();
        assert_eq!(ca.kind(), CaKind::Customer);
        assert!(ca.ca_certificate_pem().unwrap().contains("BEGIN CERTIFICATE"));

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "device-1");
        let issued = ca.issue(dn, 365).await.unwrap();
        assert!(issued.cert_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn garbage_key_is_signing_error() {
        let (root, _) = generate_root("Root").unwrap();
        let err = CustomerCa::from_pem("not a key", &root.pem()).unwrap_err();
        assert!(matches!(err, IssuanceError::Signing(_)));
    }
}
