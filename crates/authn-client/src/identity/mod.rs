//! Identity sources.
//!
//! Each source turns one kind of credential into a draft [`ClaimSet`] for
//! issuance: subject, realm and attributes, but no validity envelope (the
//! authority stamps that). Failures detectable locally (missing metadata,
//! malformed certificate, unknown directory user) are reported before the
//! authority is contacted.

mod certificate;
mod cloud;
mod directory;
mod google;
mod vince;

pub use certificate::CertificateIdentity;
pub use cloud::{
    AwsCredentials, AwsInstanceIdentity, CloudIdentity, CloudMetadataClient, CloudProvider,
    MetadataEndpoints,
};
pub use directory::{
    claims_from_entry, escape_filter_value, parse_dn, DirectoryClient, DirectoryEntry,
    DirectoryIdentity, DirectoryInfo, SecurityProtocol, DEFAULT_SEARCH_FILTER, LDAP_ADDRESS_KEY,
    LDAP_BASE_DN_KEY, LDAP_BIND_DN_KEY, LDAP_BIND_PASSWORD_KEY, LDAP_BIND_SEARCH_FILTER_KEY,
    LDAP_CONN_SECURITY_PROTOCOL_KEY, LDAP_PASSWORD_KEY, LDAP_USERNAME_KEY,
};
pub use google::{GoogleIdentity, DEFAULT_GOOGLE_ISSUER};
pub use vince::{VinceCredentials, VinceIdentity};

use crate::claims::ClaimSet;
use crate::context::CallContext;
use crate::errors::AuthnError;
use async_trait::async_trait;
use common::redact::snip;
use thiserror::Error;

/// Value stored for multi-valued or set-like attributes (`ou:eng -> true`).
pub const MULTI_VALUE_MARKER: &str = "true";

/// Identity-source failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Metadata must contain the key '{0}'")]
    MissingMetadataKey(String),

    #[error("certificate doesn't contain any organization (O)")]
    MissingOrganization,

    #[error("certificate doesn't contain a common name (CN)")]
    MissingCommonName,

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid user: user does not exist")]
    EntryNotFound,

    #[error("Invalid user: {0} entries match")]
    AmbiguousEntry(usize),

    #[error("Incorrect password")]
    InvalidCredentials,

    #[error("unable to determine the subject")]
    MissingSubject,

    #[error("third party rejected the credential: {0}")]
    ThirdPartyRejected(String),

    #[error("audience '{0}' is not acceptable")]
    AudienceMismatch(String),

    #[error("issuer '{0}' is not acceptable")]
    IssuerMismatch(String),

    #[error("metadata service error: {0}")]
    Metadata(String),

    #[error("directory error: {0}")]
    Directory(String),
}

impl IdentityError {
    /// Replace `secret` in carried text with the redaction marker.
    #[must_use]
    pub fn redact(self, secret: &str) -> Self {
        match self {
            IdentityError::ThirdPartyRejected(m) => IdentityError::ThirdPartyRejected(snip(&m, secret)),
            IdentityError::Metadata(m) => IdentityError::Metadata(snip(&m, secret)),
            IdentityError::Directory(m) => IdentityError::Directory(snip(&m, secret)),
            IdentityError::InvalidCertificate(m) => {
                IdentityError::InvalidCertificate(snip(&m, secret))
            }
            other => other,
        }
    }
}

/// Converts a credential into a draft claim set.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Credential type this source consumes.
    type Credential: ?Sized + Sync;

    /// Produce the claim set for `credential`.
    ///
    /// # Errors
    ///
    /// `Identity(..)` for credential problems, `Transport` / `Cancelled` /
    /// `DeadlineExceeded` for third-party calls.
    async fn produce_claim(
        &self,
        ctx: &CallContext,
        credential: &Self::Credential,
    ) -> Result<ClaimSet, AuthnError>;
}
