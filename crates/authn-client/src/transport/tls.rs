//! TLS material for the authority connection.

use crate::errors::AuthnError;
use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;

/// Root CAs to trust in addition to the system roots, and an optional
/// client identity.
///
/// The client identity is required for certificate-realm issuance, where the
/// presented certificate is the credential.
#[derive(Clone, Default)]
pub struct TlsMaterial {
    root_ca_pems: Vec<String>,
    client_certificate_pem: Option<String>,
    client_key_pem: Option<SecretString>,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("root_cas", &self.root_ca_pems.len())
            .field("client_certificate", &self.client_certificate_pem.is_some())
            .field(
                "client_key",
                &self.client_key_pem.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl TlsMaterial {
    /// Trust an additional PEM bundle.
    #[must_use]
    pub fn with_root_ca_pem(mut self, pem: impl Into<String>) -> Self {
        self.root_ca_pems.push(pem.into());
        self
    }

    /// Present `certificate_pem` (chain) with `key_pem` during the handshake.
    #[must_use]
    pub fn with_client_identity(mut self, certificate_pem: String, key_pem: SecretString) -> Self {
        self.client_certificate_pem = Some(certificate_pem);
        self.client_key_pem = Some(key_pem);
        self
    }

    #[must_use]
    pub fn has_client_identity(&self) -> bool {
        self.client_certificate_pem.is_some() && self.client_key_pem.is_some()
    }

    /// The client certificate PEM, if any.
    #[must_use]
    pub fn client_certificate_pem(&self) -> Option<&str> {
        self.client_certificate_pem.as_deref()
    }

    /// Install this material on a `reqwest` client builder.
    ///
    /// # Errors
    ///
    /// `Configuration` if a PEM cannot be parsed.
    pub fn apply(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, AuthnError> {
        for pem in &self.root_ca_pems {
            let certs = reqwest::Certificate::from_pem_bundle(pem.as_bytes()).map_err(|e| {
                AuthnError::Configuration(format!("invalid root CA bundle: {e}"))
            })?;
            if certs.is_empty() {
                return Err(AuthnError::Configuration(
                    "root CA bundle contains no certificate".to_string(),
                ));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let (Some(cert), Some(key)) = (&self.client_certificate_pem, &self.client_key_pem) {
            let mut combined = String::with_capacity(cert.len() + key.expose_secret().len() + 1);
            combined.push_str(key.expose_secret());
            combined.push('\n');
            combined.push_str(cert);

            let identity = reqwest::Identity::from_pem(combined.as_bytes()).map_err(|e| {
                AuthnError::Configuration(format!("invalid client certificate or key: {e}"))
            })?;
            builder = builder.identity(identity);
        }

        Ok(builder)
    }
}

/// Credentials bundle handed out by the authority: base64 encoded PEM CA,
/// certificate and key, plus the API location they are valid for.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentials {
    #[serde(default, rename = "APIURL")]
    pub api_url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    pub certificate_authority: String,

    pub certificate: String,

    certificate_key: SecretString,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("api_url", &self.api_url)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("certificate_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    /// Parse a JSON credentials document.
    ///
    /// # Errors
    ///
    /// `Configuration` if the JSON is invalid.
    pub fn parse(data: &[u8]) -> Result<Self, AuthnError> {
        serde_json::from_slice(data)
            .map_err(|e| AuthnError::Configuration(format!("unable to decode app credential: {e}")))
    }

    /// Decode the bundle into TLS material (CA as trusted root, certificate
    /// and key as client identity).
    ///
    /// # Errors
    ///
    /// `Configuration` if any field is not valid base64 or UTF-8.
    pub fn to_tls_material(&self) -> Result<TlsMaterial, AuthnError> {
        let ca = decode_field("ca", &self.certificate_authority)?;
        let cert = decode_field("certificate", &self.certificate)?;
        let key = decode_field("key", self.certificate_key.expose_secret())?;

        Ok(TlsMaterial::default()
            .with_root_ca_pem(ca)
            .with_client_identity(cert, SecretString::from(key)))
    }
}

fn decode_field(name: &str, value: &str) -> Result<String, AuthnError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| AuthnError::Configuration(format!("unable to decode {name}: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| AuthnError::Configuration(format!("unable to decode {name}: {e}")))
}
