//! Cloud instance identity.
//!
//! The instance metadata service hands out signed identity material; it is
//! passed through to the authority untouched, which performs the signature
//! check. Nothing here leaves the instance's own metadata endpoint.

use super::{IdentityError, IdentitySource};
use crate::claims::{ClaimSet, Realm};
use crate::context::CallContext;
use crate::errors::AuthnError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_AWS_METADATA_URL: &str = "http://169.254.169.254/latest/";
pub const DEFAULT_GCP_METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1/";
pub const DEFAULT_AZURE_METADATA_URL: &str = "http://169.254.169.254/";

const AWS_ROLE_PATH: &str = "meta-data/iam/security-credentials/";
const AWS_DOCUMENT_PATH: &str = "dynamic/instance-identity/document";
const AWS_SIGNATURE_PATH: &str = "dynamic/instance-identity/signature";
const GCP_IDENTITY_PATH: &str = "instance/service-accounts/default/identity";
const GCP_IDENTITY_AUDIENCE: &str = "aporeto";
const AZURE_TOKEN_PATH: &str = "metadata/identity/oauth2/token";
const AZURE_API_VERSION: &str = "2018-02-01";
const AZURE_RESOURCE: &str = "https://management.azure.com";

/// Base URLs of the metadata services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEndpoints {
    pub aws: String,
    pub gcp: String,
    pub azure: String,
}

impl Default for MetadataEndpoints {
    fn default() -> Self {
        Self {
            aws: DEFAULT_AWS_METADATA_URL.to_string(),
            gcp: DEFAULT_GCP_METADATA_URL.to_string(),
            azure: DEFAULT_AZURE_METADATA_URL.to_string(),
        }
    }
}

impl MetadataEndpoints {
    /// Point every provider at `base` (tests, proxies).
    #[must_use]
    pub fn all_at(base: &str) -> Self {
        let base = format!("{}/", base.trim_end_matches('/'));
        Self {
            aws: base.clone(),
            gcp: base.clone(),
            azure: base,
        }
    }
}

/// Temporary credentials of the instance role.
#[derive(Clone, Deserialize)]
pub struct AwsCredentials {
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: SecretString,
    #[serde(rename = "Token")]
    pub token: SecretString,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: SecretString,
        token: SecretString,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key,
            token,
        }
    }

    /// Issuance metadata form.
    #[must_use]
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("accessKeyID".to_string(), self.access_key_id.clone()),
            (
                "secretAccessKey".to_string(),
                self.secret_access_key.expose_secret().to_string(),
            ),
            ("token".to_string(), self.token.expose_secret().to_string()),
        ])
    }
}

/// Signed instance identity document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsInstanceIdentity {
    pub document: String,
    pub signature: String,
}

#[derive(Deserialize)]
struct AzureToken {
    #[serde(default)]
    access_token: String,
}

/// Which metadata service to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

impl CloudProvider {
    #[must_use]
    pub fn realm(self) -> Realm {
        match self {
            CloudProvider::Aws => Realm::AwsSecurityToken,
            CloudProvider::Gcp => Realm::GcpIdentityToken,
            CloudProvider::Azure => Realm::AzureIdentityToken,
        }
    }
}

// =============================================================================
// Metadata client
// =============================================================================

/// HTTP client for the instance metadata services.
#[derive(Debug, Clone)]
pub struct CloudMetadataClient {
    http: reqwest::Client,
    endpoints: MetadataEndpoints,
}

impl CloudMetadataClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoints: MetadataEndpoints::default(),
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: MetadataEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn endpoints(&self) -> &MetadataEndpoints {
        &self.endpoints
    }

    async fn get_text(&self, request: reqwest::RequestBuilder, what: &str) -> Result<String, AuthnError> {
        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Metadata(format!("unable to retrieve {what}: {e}")))?;

        if !response.status().is_success() {
            return Err(IdentityError::Metadata(format!(
                "unable to retrieve {what}: status {}",
                response.status().as_u16()
            ))
            .into());
        }

        response
            .text()
            .await
            .map_err(|e| IdentityError::Metadata(format!("unable to read {what}: {e}")).into())
    }

    /// Credentials of the instance's IAM role.
    ///
    /// # Errors
    ///
    /// `Identity(Metadata)` if the service is unreachable or answers garbage.
    pub async fn aws_role_credentials(&self) -> Result<AwsCredentials, AuthnError> {
        let base = &self.endpoints.aws;

        let role = self
            .get_text(self.http.get(format!("{base}{AWS_ROLE_PATH}")), "role")
            .await?;
        let role = role.lines().next().unwrap_or_default().trim().to_string();
        if role.is_empty() {
            return Err(IdentityError::Metadata("instance has no role".to_string()).into());
        }

        let body = self
            .get_text(
                self.http.get(format!("{base}{AWS_ROLE_PATH}{role}")),
                "role credentials",
            )
            .await?;

        serde_json::from_str(&body).map_err(|e| {
            IdentityError::Metadata(format!("invalid role credentials: {e}")).into()
        })
    }

    /// Signed instance identity document and its signature.
    ///
    /// # Errors
    ///
    /// `Identity(Metadata)`.
    pub async fn aws_instance_identity(&self) -> Result<AwsInstanceIdentity, AuthnError> {
        let base = &self.endpoints.aws;
        let document = self
            .get_text(
                self.http.get(format!("{base}{AWS_DOCUMENT_PATH}")),
                "instance identity document",
            )
            .await?;
        let signature = self
            .get_text(
                self.http.get(format!("{base}{AWS_SIGNATURE_PATH}")),
                "instance identity signature",
            )
            .await?;

        Ok(AwsInstanceIdentity {
            document,
            signature,
        })
    }

    /// Full-format identity token of the default service account.
    ///
    /// # Errors
    ///
    /// `Identity(Metadata)`.
    pub async fn gcp_identity_token(&self) -> Result<String, AuthnError> {
        let request = self
            .http
            .get(format!("{}{GCP_IDENTITY_PATH}", self.endpoints.gcp))
            .query(&[("audience", GCP_IDENTITY_AUDIENCE), ("format", "full")])
            .header("Metadata-Flavor", "Google");

        let token = self.get_text(request, "service account token").await?;
        Ok(token.trim().to_string())
    }

    /// Managed identity access token.
    ///
    /// # Errors
    ///
    /// `Identity(Metadata)`.
    pub async fn azure_identity_token(&self) -> Result<String, AuthnError> {
        let request = self
            .http
            .get(format!("{}{AZURE_TOKEN_PATH}", self.endpoints.azure))
            .query(&[("api-version", AZURE_API_VERSION), ("resource", AZURE_RESOURCE)])
            .header("Metadata", "true");

        let body = self.get_text(request, "managed identity token").await?;
        let token: AzureToken = serde_json::from_str(&body).map_err(|e| {
            IdentityError::Metadata(format!("invalid token returned by metadata service: {e}"))
        })?;

        if token.access_token.is_empty() {
            return Err(IdentityError::Metadata(
                "metadata service returned an empty token".to_string(),
            )
            .into());
        }
        Ok(token.access_token)
    }
}

// =============================================================================
// Identity source
// =============================================================================

/// Produces an issuance draft from the local metadata service.
///
/// `data` carries the identity material under the keys the authority
/// expects (`accessKeyID`, `secretAccessKey`, `token` for AWS; `token` for
/// GCP and Azure). The subject is left to the authority.
#[derive(Debug, Clone)]
pub struct CloudIdentity {
    provider: CloudProvider,
    metadata: CloudMetadataClient,
}

impl CloudIdentity {
    pub fn new(provider: CloudProvider, metadata: CloudMetadataClient) -> Self {
        Self { provider, metadata }
    }

    #[must_use]
    pub fn provider(&self) -> CloudProvider {
        self.provider
    }
}

#[async_trait]
impl IdentitySource for CloudIdentity {
    type Credential = ();

    #[tracing::instrument(skip_all, fields(provider = ?self.provider))]
    async fn produce_claim(&self, ctx: &CallContext, _credential: &()) -> Result<ClaimSet, AuthnError> {
        let mut claims = ClaimSet::new(self.provider.realm().as_str(), "");

        match self.provider {
            CloudProvider::Aws => {
                let creds = ctx.run(self.metadata.aws_role_credentials()).await??;
                claims.data.extend(creds.to_metadata());
            }
            CloudProvider::Gcp => {
                let token = ctx.run(self.metadata.gcp_identity_token()).await??;
                claims.data.insert("token".to_string(), token);
            }
            CloudProvider::Azure => {
                let token = ctx.run(self.metadata.azure_identity_token()).await??;
                claims.data.insert("token".to_string(), token);
            }
        }

        tracing::debug!(target: "authn.identity.cloud", "Instance identity retrieved");
        Ok(claims)
    }
}
