//! Legacy account/password identity.

use super::{IdentityError, IdentitySource};
use crate::claims::ClaimSet;
use crate::context::CallContext;
use crate::errors::AuthnError;
use crate::transport::classify_reqwest_error;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;

pub const VINCE_ACCOUNT_KEY: &str = "vinceAccount";
pub const VINCE_PASSWORD_KEY: &str = "vincePassword";

const VINCE_REALM: &str = "Vince";

/// Account name and password.
#[derive(Debug, Clone)]
pub struct VinceCredentials {
    pub account: String,
    pub password: SecretString,
}

impl VinceCredentials {
    pub fn new(account: impl Into<String>, password: SecretString) -> Self {
        Self {
            account: account.into(),
            password,
        }
    }

    /// # Errors
    ///
    /// `MissingMetadataKey` if the account or password is missing or empty.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, IdentityError> {
        let find = |key: &str| {
            metadata
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| IdentityError::MissingMetadataKey(key.to_string()))
        };

        let account = find(VINCE_ACCOUNT_KEY)?.clone();
        let password = SecretString::from(find(VINCE_PASSWORD_KEY)?.as_str());
        Ok(Self { account, password })
    }
}

/// Checks an account against `<url>/check`. Any non-200 answer is a refusal.
#[derive(Debug, Clone)]
pub struct VinceIdentity {
    http: reqwest::Client,
    url: String,
}

impl VinceIdentity {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn check(&self, credential: &VinceCredentials) -> Result<(), AuthnError> {
        let authorization = format!(
            "{} {}",
            credential.account,
            credential.password.expose_secret()
        );

        let response = self
            .http
            .get(format!("{}/check", self.url))
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!(
                target: "authn.identity.vince",
                status = response.status().as_u16(),
                "Account check refused"
            );
            return Err(IdentityError::InvalidCredentials.into());
        }

        Ok(())
    }
}

#[async_trait]
impl IdentitySource for VinceIdentity {
    type Credential = VinceCredentials;

    #[tracing::instrument(skip_all, fields(account = %credential.account))]
    async fn produce_claim(
        &self,
        ctx: &CallContext,
        credential: &VinceCredentials,
    ) -> Result<ClaimSet, AuthnError> {
        ctx.run(self.check(credential))
            .await?
            .map_err(|e| e.redact(credential.password.expose_secret()))?;

        Ok(ClaimSet::new(VINCE_REALM, credential.account.clone())
            .with_data("account", credential.account.clone())
            .with_data("organization", credential.account.clone()))
    }
}
