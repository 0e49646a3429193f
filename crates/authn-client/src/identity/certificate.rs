//! X.509 certificate identity.

use super::{IdentityError, IdentitySource, MULTI_VALUE_MARKER};
use crate::claims::ClaimSet;
use crate::context::CallContext;
use crate::errors::AuthnError;
use async_trait::async_trait;
use x509_parser::prelude::{FromDer, X509Certificate};

const CERTIFICATE_REALM: &str = "certificate";

/// Builds claims from the subject of a client certificate.
///
/// - `subject` is the decimal serial number
/// - `data` holds `commonName`, `organization` (first O), `serialNumber`,
///   `realm` and one `ou:<unit> = true` entry per organizational unit
/// - the envelope expiry is the certificate's `notAfter`
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateIdentity;

impl CertificateIdentity {
    /// Claims from a DER encoded certificate.
    ///
    /// # Errors
    ///
    /// `InvalidCertificate`, `MissingOrganization` or `MissingCommonName`.
    pub fn claims_from_der(der: &[u8]) -> Result<ClaimSet, IdentityError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| IdentityError::InvalidCertificate(e.to_string()))?;
        claims_from_certificate(&cert)
    }

    /// Claims from a PEM encoded certificate (first block).
    ///
    /// # Errors
    ///
    /// Same as [`CertificateIdentity::claims_from_der`].
    pub fn claims_from_pem(pem: &[u8]) -> Result<ClaimSet, IdentityError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| IdentityError::InvalidCertificate(e.to_string()))?;
        Self::claims_from_der(&pem.contents)
    }
}

fn claims_from_certificate(cert: &X509Certificate<'_>) -> Result<ClaimSet, IdentityError> {
    let subject = cert.subject();

    let organization = subject
        .iter_organization()
        .filter_map(|attr| attr.as_str().ok())
        .find(|o| !o.is_empty())
        .ok_or(IdentityError::MissingOrganization)?;

    let common_name = subject
        .iter_common_name()
        .filter_map(|attr| attr.as_str().ok())
        .find(|cn| !cn.is_empty())
        .ok_or(IdentityError::MissingCommonName)?;

    let serial = cert.tbs_certificate.serial.to_string();

    let mut claims = ClaimSet::new(CERTIFICATE_REALM, serial.clone())
        .with_data("commonName", common_name)
        .with_data("organization", organization)
        .with_data("serialNumber", serial)
        .with_data("realm", CERTIFICATE_REALM);

    for unit in subject
        .iter_organizational_unit()
        .filter_map(|attr| attr.as_str().ok())
        .filter(|ou| !ou.is_empty())
    {
        claims = claims.with_data(format!("ou:{unit}"), MULTI_VALUE_MARKER);
    }

    claims.envelope.exp = cert.validity().not_after.timestamp();

    tracing::debug!(
        target: "authn.identity.certificate",
        subject = %claims.subject(),
        "Certificate claims extracted"
    );

    Ok(claims)
}

#[async_trait]
impl IdentitySource for CertificateIdentity {
    type Credential = [u8];

    async fn produce_claim(
        &self,
        _ctx: &CallContext,
        credential: &[u8],
    ) -> Result<ClaimSet, AuthnError> {
        Ok(Self::claims_from_der(credential)?)
    }
}
