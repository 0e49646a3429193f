//! Issuance request and response bodies.

use crate::claims::{ClaimSet, Realm};
use crate::errors::AuthnError;
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Optional parameters of an issuance request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueOptions {
    quota: Option<u32>,
    opaque: Option<HashMap<String, String>>,
    audience: Option<String>,
    restricted_namespace: Option<String>,
    restricted_permissions: Vec<String>,
    restricted_networks: Vec<String>,
}

impl IssueOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of times the issued token can be used.
    #[must_use]
    pub fn quota(mut self, quota: u32) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Pass-through data included in the token.
    #[must_use]
    pub fn opaque(mut self, opaque: HashMap<String, String>) -> Self {
        self.opaque = Some(opaque);
        self
    }

    /// Requested audience of the token.
    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Restrict the token to a namespace.
    #[must_use]
    pub fn restrict_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.restricted_namespace = Some(namespace.into());
        self
    }

    /// Restrict the token to a set of permissions.
    #[must_use]
    pub fn restrict_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restricted_permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the token to a set of networks (CIDRs).
    #[must_use]
    pub fn restrict_networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restricted_networks = networks.into_iter().map(Into::into).collect();
        self
    }
}

/// Body of `POST /issue`.
#[derive(Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub realm: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub validity: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub opaque: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_namespace: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restricted_permissions: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restricted_networks: Vec<String>,

    /// Credential values scrubbed from every error of this request.
    #[serde(skip)]
    redactions: Vec<SecretString>,
}

/// Metadata values routinely carry passwords and third-party tokens, so only
/// keys are shown.
impl fmt::Debug for IssueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssueRequest")
            .field("realm", &self.realm)
            .field("data", &self.data.as_ref().map(|_| "[REDACTED]"))
            .field("metadata_keys", &self.metadata.keys().collect::<Vec<_>>())
            .field("validity", &self.validity)
            .field("quota", &self.quota)
            .field("audience", &self.audience)
            .field("restricted_namespace", &self.restricted_namespace)
            .field("redactions", &self.redactions.len())
            .finish_non_exhaustive()
    }
}

impl IssueRequest {
    /// A request for `realm` with no validity (used by redirect-only steps).
    #[must_use]
    pub fn new(realm: Realm) -> Self {
        Self {
            realm: realm.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Request a token valid for `validity`.
    #[must_use]
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = format_validity(validity);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge string metadata entries.
    #[must_use]
    pub fn with_metadata_map<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in entries {
            self.metadata
                .insert(k.into(), serde_json::Value::String(v.into()));
        }
        self
    }

    /// Scrub `secret` from any error this request produces, including the
    /// ones logged between retries.
    #[must_use]
    pub fn redacting(mut self, secret: &str) -> Self {
        if !secret.is_empty() {
            self.redactions.push(SecretString::from(secret));
        }
        self
    }

    pub(crate) fn redact(&self, err: AuthnError) -> AuthnError {
        self.redactions
            .iter()
            .fold(err, |err, secret| err.redact(secret.expose_secret()))
    }

    /// Apply issuance options.
    #[must_use]
    pub fn with_options(mut self, options: IssueOptions) -> Self {
        self.quota = options.quota;
        self.opaque = options.opaque;
        self.audience = options.audience;
        self.restricted_namespace = options.restricted_namespace;
        self.restricted_permissions = options.restricted_permissions;
        self.restricted_networks = options.restricted_networks;
        self
    }

    /// Submit a locally produced claim set: its realm, data and opaque
    /// values become metadata for the authority to re-check.
    ///
    /// Well-known realms are sent under their wire name.
    #[must_use]
    pub fn from_claims(claims: &ClaimSet) -> Self {
        let realm = claims
            .known_realm()
            .map_or_else(|| claims.realm.clone(), |r| r.as_str().to_string());
        let mut request = Self {
            realm,
            ..Self::default()
        };
        if !claims.subject().is_empty() {
            request = request.with_metadata("subject", claims.subject());
        }
        request = request.with_metadata_map(claims.data.clone());
        request.quota = claims.quota;
        request.opaque.clone_from(&claims.opaque);
        request
    }
}

/// Render a validity the way the authority parses durations (e.g. `3600s`).
#[must_use]
pub fn format_validity(validity: Duration) -> String {
    format!("{}s", validity.as_secs())
}

/// Result of an issuance call.
#[derive(Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// The authority issued a token.
    Token(String),
    /// The authority wants the caller to continue the flow at this URL.
    Redirect(String),
}

impl fmt::Debug for IssueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueOutcome::Token(_) => f.write_str("Token([REDACTED])"),
            IssueOutcome::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
        }
    }
}

impl IssueOutcome {
    /// The token, if this outcome is one.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        match self {
            IssueOutcome::Token(token) => Some(token),
            IssueOutcome::Redirect(_) => None,
        }
    }

    /// The redirect location, if this outcome is one.
    #[must_use]
    pub fn into_redirect(self) -> Option<String> {
        match self {
            IssueOutcome::Redirect(url) => Some(url),
            IssueOutcome::Token(_) => None,
        }
    }
}

/// Success body of `POST /issue`. Only the token matters to the client.
#[derive(Deserialize)]
pub(crate) struct IssueResponse {
    #[serde(default)]
    pub token: String,
}

/// Success body of `GET /auth`.
#[derive(Deserialize)]
pub(crate) struct AuthResponse {
    #[serde(default)]
    pub claims: Option<ClaimSet>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_body() {
        let body = serde_json::to_value(
            IssueRequest::new(Realm::Certificate).with_validity(Duration::from_secs(3600)),
        )
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({"realm": "Certificate", "validity": "3600s"})
        );
    }

    #[test]
    fn test_options_are_encoded() {
        let opaque = HashMap::from([("k".to_string(), "v".to_string())]);
        let body = serde_json::to_value(
            IssueRequest::new(Realm::Google)
                .with_data("google-jwt")
                .with_validity(Duration::from_secs(60))
                .with_options(
                    IssueOptions::new()
                        .quota(2)
                        .opaque(opaque)
                        .audience("aud")
                        .restrict_namespace("/acme")
                        .restrict_permissions(["@auth:role=viewer"])
                        .restrict_networks(["10.0.0.0/8"]),
                ),
        )
        .unwrap();

        assert_eq!(body["data"], "google-jwt");
        assert_eq!(body["quota"], 2);
        assert_eq!(body["opaque"]["k"], "v");
        assert_eq!(body["audience"], "aud");
        assert_eq!(body["restrictedNamespace"], "/acme");
        assert_eq!(body["restrictedPermissions"][0], "@auth:role=viewer");
        assert_eq!(body["restrictedNetworks"][0], "10.0.0.0/8");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let request = IssueRequest::new(Realm::Vince)
            .with_metadata("vincePassword", "hunter2")
            .with_data("3rd-party-token");
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("3rd-party-token"));
        assert!(debug.contains("vincePassword"));

        assert!(!format!("{:?}", IssueOutcome::Token("secret.jwt".into())).contains("secret"));
    }

    #[test]
    fn test_redactions_are_not_serialized() {
        let request = IssueRequest::new(Realm::Google)
            .with_data("google-jwt")
            .redacting("google-jwt")
            .redacting("");
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, serde_json::json!({"realm": "Google", "data": "google-jwt"}));

        let err = request.redact(AuthnError::Transport("sent google-jwt".to_string()));
        assert_eq!(err.to_string(), AuthnError::Transport("sent [snip]".to_string()).to_string());
    }

    #[test]
    fn test_from_claims() {
        let claims = ClaimSet::new("certificate", "1234").with_data("commonName", "superadmin");
        let body = serde_json::to_value(IssueRequest::from_claims(&claims)).unwrap();
        assert_eq!(body["realm"], "Certificate");
        assert_eq!(body["metadata"]["subject"], "1234");
        assert_eq!(body["metadata"]["commonName"], "superadmin");
    }

    #[test]
    fn test_auth_response_with_null_claims() {
        let response: AuthResponse = serde_json::from_str(r#"{"claims": null}"#).unwrap();
        assert!(response.claims.is_none());
    }
}
