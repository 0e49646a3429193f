//! Certificate and key fixtures for testing
//!
//! Certificates are generated with `rcgen` (ECDSA P-256). HMAC secrets are
//! deterministic based on a seed value.

use authn_client::claims::{SigningKey, VerificationKey};
use authn_client::transport::TlsMaterial;
use common::secret::{secret_bytes, SecretBox, SecretString};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};

/// A generated certificate with its private key.
pub struct TestCertificate {
    pub certificate_pem: String,
    pub certificate_der: Vec<u8>,
    pub key_pem: String,
}

impl TestCertificate {
    /// Client identity material presenting this certificate.
    pub fn tls_material(&self) -> TlsMaterial {
        TlsMaterial::default().with_client_identity(
            self.certificate_pem.clone(),
            SecretString::from(self.key_pem.clone()),
        )
    }

    /// ES256 signing key from the certificate's private key.
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::ecdsa_from_pem(self.key_pem.as_bytes()).expect("fixture key must be valid")
    }

    /// ES256 verification key from the certificate's public key.
    pub fn verification_key(&self) -> VerificationKey {
        VerificationKey::ecdsa_from_certificate_der(&self.certificate_der)
            .expect("fixture certificate must carry an EC key")
    }
}

/// Builder for client certificates.
///
/// # Example
/// ```rust,ignore
/// let cert = TestCertificateBuilder::new()
///     .organization("aporeto.com")
///     .unit("admin")
///     .common_name("superadmin")
///     .serial(42)
///     .build();
/// ```
pub struct TestCertificateBuilder {
    organizations: Vec<String>,
    units: Vec<String>,
    common_name: Option<String>,
    serial: u64,
}

impl TestCertificateBuilder {
    /// Defaults: organization `aporeto.com`, common name `superadmin`.
    pub fn new() -> Self {
        Self {
            organizations: vec!["aporeto.com".to_string()],
            units: Vec::new(),
            common_name: Some("superadmin".to_string()),
            serial: 1,
        }
    }

    /// Replace the organizations with a single one.
    pub fn organization(mut self, organization: &str) -> Self {
        self.organizations = vec![organization.to_string()];
        self
    }

    pub fn without_organization(mut self) -> Self {
        self.organizations.clear();
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.units.push(unit.to_string());
        self
    }

    pub fn common_name(mut self, common_name: &str) -> Self {
        self.common_name = Some(common_name.to_string());
        self
    }

    pub fn without_common_name(mut self) -> Self {
        self.common_name = None;
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Generate the self-signed certificate.
    pub fn build(self) -> TestCertificate {
        let key = KeyPair::generate().expect("key generation must succeed");
        let mut params =
            CertificateParams::new(vec!["localhost".to_string()]).expect("params must be valid");

        params.distinguished_name = DistinguishedName::new();
        for o in &self.organizations {
            params
                .distinguished_name
                .push(DnType::OrganizationName, o.as_str());
        }
        for ou in &self.units {
            params
                .distinguished_name
                .push(DnType::OrganizationalUnitName, ou.as_str());
        }
        if let Some(cn) = &self.common_name {
            params.distinguished_name.push(DnType::CommonName, cn.as_str());
        }
        params.serial_number = Some(SerialNumber::from(self.serial));

        let cert = params.self_signed(&key).expect("self signing must succeed");
        TestCertificate {
            certificate_pem: cert.pem(),
            certificate_der: cert.der().to_vec(),
            key_pem: key.serialize_pem(),
        }
    }
}

impl Default for TestCertificateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A deterministic 32-byte HMAC secret.
///
/// The same seed always produces the same secret.
pub fn test_hmac_secret(seed: u8) -> SecretBox<[u8]> {
    let bytes: Vec<u8> = (0..32_u8)
        .map(|i| seed.wrapping_mul(31).wrapping_add(i))
        .collect();
    secret_bytes(&bytes)
}

/// HS256 signing and verification keys for `seed`.
pub fn test_hmac_keys(seed: u8) -> (SigningKey, VerificationKey) {
    let secret = test_hmac_secret(seed);
    (SigningKey::hmac(&secret), VerificationKey::hmac(&secret))
}
