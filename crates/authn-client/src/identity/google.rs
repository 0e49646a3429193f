//! Google ID token identity.

use super::{IdentityError, IdentitySource};
use crate::claims::ClaimSet;
use crate::context::CallContext;
use crate::errors::AuthnError;
use crate::transport::classify_reqwest_error;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

/// Issuer Google stamps on its ID tokens.
pub const DEFAULT_GOOGLE_ISSUER: &str = "accounts.google.com";

const GOOGLE_REALM: &str = "google";
const DEFAULT_ORGANIZATION: &str = "gmail.com";

/// Token validation endpoint answer.
#[derive(Debug, Default, Deserialize)]
struct GoogleTokenInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    email: String,
    /// Hosted domain, absent for consumer accounts.
    #[serde(default)]
    hd: String,
    #[serde(default)]
    aud: String,
    #[serde(default)]
    iss: String,
    #[serde(default)]
    sub: String,
    #[serde(default, deserialize_with = "string_or_number")]
    exp: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    iat: i64,
}

/// Google reports timestamps as JSON strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Validates a Google ID token against Google's validation endpoint.
///
/// The endpoint must answer 200 and the token must carry the expected
/// client id as audience and the expected issuer.
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    http: reqwest::Client,
    validation_url: String,
    client_id: String,
    issuer: String,
}

impl GoogleIdentity {
    pub fn new(http: reqwest::Client, validation_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http,
            validation_url: validation_url.into(),
            client_id: client_id.into(),
            issuer: DEFAULT_GOOGLE_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    async fn fetch(&self, token: &str) -> Result<GoogleTokenInfo, AuthnError> {
        let response = self
            .http
            .get(&self.validation_url)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e.without_url()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(IdentityError::ThirdPartyRejected(format!(
                "Google did not validate the token (status {})",
                response.status().as_u16()
            ))
            .into());
        }

        response
            .json::<GoogleTokenInfo>()
            .await
            .map_err(|e| AuthnError::Protocol(format!("invalid Google token info: {e}")))
    }

    fn to_claims(&self, info: GoogleTokenInfo) -> Result<ClaimSet, IdentityError> {
        if info.aud != self.client_id {
            return Err(IdentityError::AudienceMismatch(info.aud));
        }
        if info.iss != self.issuer {
            return Err(IdentityError::IssuerMismatch(info.iss));
        }
        if info.sub.is_empty() {
            return Err(IdentityError::MissingSubject);
        }

        let organization = if info.hd.is_empty() {
            DEFAULT_ORGANIZATION.to_string()
        } else {
            info.hd
        };

        let mut claims = ClaimSet::new(GOOGLE_REALM, info.sub)
            .with_data("email", info.email)
            .with_data("givenName", info.given_name)
            .with_data("familyName", info.family_name)
            .with_data("name", info.name)
            .with_data("organization", organization);
        claims.envelope.exp = info.exp;
        claims.envelope.iat = info.iat;

        Ok(claims)
    }
}

#[async_trait]
impl IdentitySource for GoogleIdentity {
    type Credential = str;

    #[tracing::instrument(skip_all)]
    async fn produce_claim(&self, ctx: &CallContext, credential: &str) -> Result<ClaimSet, AuthnError> {
        let result = match ctx.run(self.fetch(credential)).await {
            Ok(fetched) => fetched.and_then(|info| self.to_claims(info).map_err(AuthnError::from)),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            let e = e.redact(credential);
            tracing::debug!(target: "authn.identity.google", error = %e, "Google token refused");
            e
        })
    }
}
