//! HTTP client for the authentication authority.
//!
//! Two operations go over the wire:
//!
//! - `POST {authority}/issue` with an [`IssueRequest`] body. A 200 carries
//!   the token, a 302 carries the `Location` of the next step of a federated
//!   login, anything else carries a JSON error list.
//! - `GET {authority}/auth?token=...`. A 200 carries the claims, anything
//!   else means the token is refused.
//!
//! Both run under the configured [`crate::transport::RetryPolicy`] and the
//! caller's [`CallContext`].

use super::decorate::{RequestDecorator, TraceContextDecorator, TrackingTypeDecorator};
use super::request::{AuthResponse, IssueOptions, IssueOutcome, IssueRequest, IssueResponse};
use super::retry::classify_reqwest_error;
use super::verifier::TokenVerifier;
use crate::claims::{ClaimSet, ClaimsError, NormalizedClaims, Realm};
use crate::config::ClientConfig;
use crate::context::CallContext;
use crate::errors::{AuthnError, AuthorityError};
use crate::identity::{
    AwsCredentials, CloudMetadataClient, DirectoryInfo, IdentitySource, MetadataEndpoints,
};
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Received statuses meaning the authority is temporarily unreachable.
const GATEWAY_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Client of the authentication authority.
#[derive(Clone)]
pub struct AuthorityClient {
    config: ClientConfig,
    http: reqwest::Client,
    decorators: Vec<Arc<dyn RequestDecorator>>,
    metadata: CloudMetadataClient,
}

impl std::fmt::Debug for AuthorityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityClient")
            .field("config", &self.config)
            .field("decorators", &self.decorators.len())
            .finish_non_exhaustive()
    }
}

impl AuthorityClient {
    /// Build the client.
    ///
    /// Redirects are never followed: a 302 on issuance is an answer, not a
    /// detour.
    ///
    /// # Errors
    ///
    /// `Configuration` if the TLS material is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, AuthnError> {
        let builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout);

        let http = config
            .tls
            .apply(builder)?
            .build()
            .map_err(|e| AuthnError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        let metadata_http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AuthnError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        let mut decorators: Vec<Arc<dyn RequestDecorator>> = vec![Arc::new(TraceContextDecorator)];
        if let Some(tracking_type) = config.tracking_type.as_deref().filter(|t| !t.is_empty()) {
            decorators.push(Arc::new(TrackingTypeDecorator::new(tracking_type)));
        }

        tracing::debug!(
            target: "authn.transport",
            authority_url = %config.authority_url,
            client_identity = config.tls.has_client_identity(),
            "Authority client created"
        );

        Ok(Self {
            config,
            http,
            decorators,
            metadata: CloudMetadataClient::new(metadata_http),
        })
    }

    /// Append a request decorator. Decorators run in insertion order.
    #[must_use]
    pub fn with_decorator(mut self, decorator: impl RequestDecorator + 'static) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Use other cloud metadata endpoints.
    #[must_use]
    pub fn with_metadata_endpoints(mut self, endpoints: MetadataEndpoints) -> Self {
        self.metadata = self.metadata.with_endpoints(endpoints);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn metadata_client(&self) -> &CloudMetadataClient {
        &self.metadata
    }

    fn decorate(&self, ctx: &CallContext, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        self.decorators
            .iter()
            .fold(request, |request, decorator| decorator.decorate(ctx, request))
    }

    // =========================================================================
    // Issuance
    // =========================================================================

    /// Submit an issuance request.
    ///
    /// Values registered with [`IssueRequest::redacting`] never appear in
    /// the returned error or in the logs.
    ///
    /// # Errors
    ///
    /// `Authority` with the decoded error list for a refusal, `Rejected` for
    /// an undecodable 401/403, `Protocol` for any other undecodable answer,
    /// `Tls`, `Transport` (after the retry policy gave up), `Cancelled` or
    /// `DeadlineExceeded`.
    #[instrument(skip_all, fields(realm = %request.realm))]
    pub async fn issue(&self, ctx: &CallContext, request: &IssueRequest) -> Result<IssueOutcome, AuthnError> {
        let url = format!("{}/issue", self.config.authority_url);
        let body = serde_json::to_vec(request)
            .map_err(|e| AuthnError::Protocol(format!("unable to encode issue request: {e}")))?;

        let url = url.as_str();
        let body = body.as_slice();
        let outcome = self
            .config
            .retry
            .run(ctx, "issue", move |attempt| async move {
                self.issue_attempt(ctx, url, body, attempt)
                    .await
                    .map_err(|e| request.redact(e))
            })
            .await;

        match &outcome {
            Ok(IssueOutcome::Token(_)) => {
                tracing::debug!(target: "authn.transport", "Token issued");
            }
            Ok(IssueOutcome::Redirect(location)) => {
                tracing::debug!(target: "authn.transport", location = %location, "Issuance redirected");
            }
            Err(e) => {
                tracing::warn!(target: "authn.transport", error = %e, "Issuance failed");
            }
        }

        outcome
    }

    async fn issue_attempt(
        &self,
        ctx: &CallContext,
        url: &str,
        body: &[u8],
        attempt: u32,
    ) -> Result<IssueOutcome, AuthnError> {
        let started = Instant::now();
        tracing::trace!(target: "authn.transport", attempt, "Sending issue request");

        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        let result = match self.decorate(ctx, request).send().await {
            Ok(response) => read_issue_response(response).await,
            Err(e) => Err(classify_reqwest_error(&e.without_url())),
        };

        metrics::record_authority_request("issue", status_label(&result), started.elapsed());
        result
    }

    /// Submit an issuance request that must produce a token.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue`], plus `Protocol` on a redirect.
    pub async fn issue_token(&self, ctx: &CallContext, request: &IssueRequest) -> Result<String, AuthnError> {
        match self.issue(ctx, request).await? {
            IssueOutcome::Token(token) => Ok(token),
            IssueOutcome::Redirect(location) => Err(AuthnError::Protocol(format!(
                "unexpected redirect to '{location}'"
            ))),
        }
    }

    /// Submit the first step of a redirect-based login.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue`], plus `Protocol` if a token comes back.
    pub async fn issue_redirect(&self, ctx: &CallContext, request: &IssueRequest) -> Result<String, AuthnError> {
        match self.issue(ctx, request).await? {
            IssueOutcome::Redirect(location) => Ok(location),
            IssueOutcome::Token(_) => Err(AuthnError::Protocol(
                "expected a redirect but a token was issued".to_string(),
            )),
        }
    }

    /// Issue with the client certificate as credential.
    ///
    /// # Errors
    ///
    /// `Configuration` when no client identity is configured, otherwise as
    /// [`AuthorityClient::issue_token`].
    pub async fn issue_from_certificate(
        &self,
        ctx: &CallContext,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        if !self.config.tls.has_client_identity() {
            return Err(AuthnError::Configuration(
                "certificate issuance requires a client certificate".to_string(),
            ));
        }

        let request = IssueRequest::new(Realm::Certificate)
            .with_validity(validity)
            .with_options(options);
        self.issue_token(ctx, &request).await
    }

    /// # Errors
    ///
    /// As [`AuthorityClient::issue_token`].
    pub async fn issue_from_ldap(
        &self,
        ctx: &CallContext,
        info: &DirectoryInfo,
        namespace: &str,
        provider: &str,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Ldap)
            .with_metadata_map(info.to_metadata())
            .with_metadata("namespace", namespace)
            .with_metadata("provider", provider)
            .with_validity(validity)
            .with_options(options)
            .redacting(info.password.expose_secret())
            .redacting(info.bind_password.expose_secret());

        self.issue_token(ctx, &request).await
    }

    /// # Errors
    ///
    /// As [`AuthorityClient::issue_token`].
    pub async fn issue_from_google(
        &self,
        ctx: &CallContext,
        google_jwt: &str,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Google)
            .with_data(google_jwt)
            .with_validity(validity)
            .with_options(options)
            .redacting(google_jwt);

        self.issue_token(ctx, &request).await
    }

    /// # Errors
    ///
    /// As [`AuthorityClient::issue_token`].
    pub async fn issue_from_vince(
        &self,
        ctx: &CallContext,
        account: &str,
        password: &SecretString,
        otp: &str,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Vince)
            .with_metadata("vinceAccount", account)
            .with_metadata("vincePassword", password.expose_secret())
            .with_metadata("vinceOTP", otp)
            .with_validity(validity)
            .with_options(options)
            .redacting(password.expose_secret());

        self.issue_token(ctx, &request).await
    }

    /// Issue from AWS credentials. Without explicit credentials, the
    /// instance role credentials are read from the metadata service.
    ///
    /// # Errors
    ///
    /// `Identity(Metadata)` if the metadata service fails, otherwise as
    /// [`AuthorityClient::issue_token`].
    pub async fn issue_from_aws_security_token(
        &self,
        ctx: &CallContext,
        credentials: Option<&AwsCredentials>,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let fetched;
        let credentials = match credentials {
            Some(creds) => creds,
            None => {
                fetched = ctx.run(self.metadata.aws_role_credentials()).await??;
                &fetched
            }
        };

        let request = IssueRequest::new(Realm::AwsSecurityToken)
            .with_metadata_map(credentials.to_metadata())
            .with_validity(validity)
            .with_options(options)
            .redacting(credentials.secret_access_key.expose_secret())
            .redacting(credentials.token.expose_secret());

        self.issue_token(ctx, &request).await
    }

    /// Issue from a GCP identity token, fetched from the metadata service
    /// when not given.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue_from_aws_security_token`].
    pub async fn issue_from_gcp_identity_token(
        &self,
        ctx: &CallContext,
        token: Option<&str>,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let token = match token.filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => ctx.run(self.metadata.gcp_identity_token()).await??,
        };
        self.issue_from_cloud_token(ctx, Realm::GcpIdentityToken, &token, validity, options)
            .await
    }

    /// Issue from an Azure managed identity token, fetched from the metadata
    /// service when not given.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue_from_aws_security_token`].
    pub async fn issue_from_azure_identity_token(
        &self,
        ctx: &CallContext,
        token: Option<&str>,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let token = match token.filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => ctx.run(self.metadata.azure_identity_token()).await??,
        };
        self.issue_from_cloud_token(ctx, Realm::AzureIdentityToken, &token, validity, options)
            .await
    }

    async fn issue_from_cloud_token(
        &self,
        ctx: &CallContext,
        realm: Realm,
        token: &str,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(realm)
            .with_metadata("token", token)
            .with_validity(validity)
            .with_options(options)
            .redacting(token);

        self.issue_token(ctx, &request).await
    }

    /// First OIDC step: returns the provider's authorization URL.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue_redirect`].
    pub async fn issue_from_oidc_step1(
        &self,
        ctx: &CallContext,
        namespace: &str,
        provider: &str,
        redirect_url: &str,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Oidc)
            .with_metadata("namespace", namespace)
            .with_metadata("OIDCProviderName", provider)
            .with_metadata("redirectURL", redirect_url);
        self.issue_redirect(ctx, &request).await
    }

    /// Second OIDC step: exchanges the authorization code for a token.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue_token`].
    pub async fn issue_from_oidc_step2(
        &self,
        ctx: &CallContext,
        code: &str,
        state: &str,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Oidc)
            .with_metadata("code", code)
            .with_metadata("state", state)
            .with_validity(validity)
            .with_options(options)
            .redacting(code);
        self.issue_token(ctx, &request).await
    }

    /// First SAML step: returns the identity provider's URL.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue_redirect`].
    pub async fn issue_from_saml_step1(
        &self,
        ctx: &CallContext,
        namespace: &str,
        provider: &str,
        redirect_url: &str,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Saml)
            .with_metadata("namespace", namespace)
            .with_metadata("SAMLProviderName", provider)
            .with_metadata("redirectURL", redirect_url);
        self.issue_redirect(ctx, &request).await
    }

    /// Second SAML step: exchanges the SAML response for a token.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::issue_token`].
    pub async fn issue_from_saml_step2(
        &self,
        ctx: &CallContext,
        response: &str,
        relay_state: &str,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError> {
        let request = IssueRequest::new(Realm::Saml)
            .with_metadata("SAMLResponse", response)
            .with_metadata("relayState", relay_state)
            .with_validity(validity)
            .with_options(options)
            .redacting(response);
        self.issue_token(ctx, &request).await
    }

    /// Run `source` on `credential` and submit the resulting claims.
    ///
    /// Credential problems detectable locally fail here, before the
    /// authority is contacted.
    ///
    /// # Errors
    ///
    /// The source's error, or as [`AuthorityClient::issue_token`].
    pub async fn issue_from_identity<S>(
        &self,
        ctx: &CallContext,
        source: &S,
        credential: &S::Credential,
        validity: Duration,
        options: IssueOptions,
    ) -> Result<String, AuthnError>
    where
        S: IdentitySource,
    {
        let claims = source.produce_claim(ctx, credential).await?;
        let request = IssueRequest::from_claims(&claims)
            .with_validity(validity)
            .with_options(options);
        self.issue_token(ctx, &request).await
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Ask the authority for the claims of `token`.
    ///
    /// The token never appears in the returned error.
    ///
    /// # Errors
    ///
    /// `Claims(TokenTooLarge)` before any network call for oversized
    /// tokens, `Rejected` for any refusal, `Protocol` for an undecodable
    /// 200, `Tls`, `Transport`, `Cancelled` or `DeadlineExceeded`.
    #[instrument(skip_all)]
    pub async fn verify(&self, ctx: &CallContext, token: &str) -> Result<ClaimSet, AuthnError> {
        common::jwt::check_size(token).map_err(ClaimsError::from)?;

        let url = format!("{}/auth", self.config.authority_url);
        let url = url.as_str();

        self.config
            .retry
            .run(ctx, "verify", move |attempt| self.verify_attempt(ctx, url, token, attempt))
            .await
            .map_err(|e| {
                let e = e.redact(token);
                tracing::debug!(target: "authn.transport", error = %e, "Verification failed");
                e
            })
    }

    async fn verify_attempt(
        &self,
        ctx: &CallContext,
        url: &str,
        token: &str,
        attempt: u32,
    ) -> Result<ClaimSet, AuthnError> {
        let started = Instant::now();
        tracing::trace!(target: "authn.transport", attempt, "Sending verification request");

        let request = self.http.get(url).query(&[("token", token)]);

        // The reported URL carries the token, possibly percent-encoded.
        let result = match self.decorate(ctx, request).send().await {
            Ok(response) => read_auth_response(response).await,
            Err(e) => Err(classify_reqwest_error(&e.without_url())),
        };

        metrics::record_authority_request("verify", status_label(&result), started.elapsed());
        result.map_err(|e| e.redact(token))
    }

    /// Verify `token` and normalize its claims, without caching.
    ///
    /// # Errors
    ///
    /// As [`AuthorityClient::verify`].
    pub async fn authenticate(&self, ctx: &CallContext, token: &str) -> Result<NormalizedClaims, AuthnError> {
        self.verify(ctx, token)
            .await
            .map(|claims| NormalizedClaims::from_claims(&claims))
    }
}

#[async_trait]
impl TokenVerifier for AuthorityClient {
    async fn verify(&self, ctx: &CallContext, token: &str) -> Result<ClaimSet, AuthnError> {
        AuthorityClient::verify(self, ctx, token).await
    }
}

// =============================================================================
// Response handling
// =============================================================================

async fn read_issue_response(response: reqwest::Response) -> Result<IssueOutcome, AuthnError> {
    let status = response.status();

    if status == StatusCode::FOUND {
        return response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|location| IssueOutcome::Redirect(location.to_string()))
            .ok_or_else(|| AuthnError::Protocol("redirect without a Location header".to_string()));
    }

    if GATEWAY_STATUSES.contains(&status) {
        return Err(AuthnError::Transport(format!(
            "authority unavailable (status {})",
            status.as_u16()
        )));
    }

    if status == StatusCode::OK {
        let body: IssueResponse = response
            .json()
            .await
            .map_err(|e| AuthnError::Protocol(format!("unable to decode issue response: {e}")))?;
        if body.token.is_empty() {
            return Err(AuthnError::Protocol("issue response carries no token".to_string()));
        }
        return Ok(IssueOutcome::Token(body.token));
    }

    let data = response.bytes().await.map_err(|e| {
        AuthnError::Protocol(format!(
            "authority did not issue a token and client could not read why: {e} (status {})",
            status.as_u16()
        ))
    })?;

    match serde_json::from_slice::<Vec<AuthorityError>>(&data) {
        Ok(errors) if !errors.is_empty() => Err(AuthnError::Authority(errors)),
        _ if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Err(AuthnError::Rejected(format!("status {}", status.as_u16())))
        }
        _ => Err(AuthnError::Protocol(format!(
            "authority did not issue a token and client could not decode why (status {})",
            status.as_u16()
        ))),
    }
}

async fn read_auth_response(response: reqwest::Response) -> Result<ClaimSet, AuthnError> {
    let status = response.status();

    if GATEWAY_STATUSES.contains(&status) {
        return Err(AuthnError::Transport(format!(
            "authority unavailable (status {})",
            status.as_u16()
        )));
    }

    if status != StatusCode::OK {
        return Err(AuthnError::Rejected(format!("status {}", status.as_u16())));
    }

    let body: AuthResponse = response
        .json()
        .await
        .map_err(|e| AuthnError::Protocol(format!("unable to decode auth response: {e}")))?;

    body.claims
        .ok_or_else(|| AuthnError::Rejected("No claims returned".to_string()))
}

fn status_label<T>(result: &Result<T, AuthnError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(AuthnError::Rejected(_) | AuthnError::Authority(_)) => "rejected",
        Err(AuthnError::DeadlineExceeded) => "timeout",
        Err(AuthnError::Transport(message)) if message.contains("timed out") => "timeout",
        Err(_) => "error",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::RetryPolicy;
    use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AuthorityClient {
        let config = ClientConfig::new(server.uri())
            .unwrap()
            .with_retry(RetryPolicy::no_retry())
            .with_tracking_type("enforcerd");
        AuthorityClient::new(config).unwrap()
    }

    fn claims_body() -> serde_json::Value {
        serde_json::json!({
            "claims": {
                "realm": "certificate",
                "sub": "1234",
                "aud": "aporeto.com",
                "iss": "midgard.aporeto.com",
                "iat": 1_700_000_000,
                "exp": 1_700_003_600,
                "data": {"commonName": "superadmin", "organization": "aporeto.com"}
            }
        })
    }

    #[tokio::test]
    async fn test_transport_error_hides_percent_encoded_token() {
        let config = ClientConfig::new("http://127.0.0.1:1")
            .unwrap()
            .with_retry(RetryPolicy::no_retry());
        let client = AuthorityClient::new(config).unwrap();
        let token = "opaque+token/with=padding==";

        let err = client.verify(&CallContext::new(), token).await.unwrap_err();

        assert!(matches!(err, AuthnError::Transport(_)));
        let text = format!("{err} {err:?}");
        assert!(!text.contains(token));
        assert!(!text.contains("opaque%2Btoken"));
        assert!(!text.contains("token="));
    }

    #[tokio::test]
    async fn test_verify_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(query_param("token", "good-token"))
            .and(header_exists("traceparent"))
            .and(header_exists("X-External-Tracking-Type"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims_body()))
            .expect(1)
            .mount(&server)
            .await;

        let claims = client(&server)
            .verify(&CallContext::new(), "good-token")
            .await
            .unwrap();

        assert_eq!(claims.subject(), "1234");
        assert_eq!(claims.data["commonName"], "superadmin");
    }

    #[tokio::test]
    async fn test_authenticate_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims_body()))
            .mount(&server)
            .await;

        let normalized = client(&server)
            .authenticate(&CallContext::new(), "good-token")
            .await
            .unwrap();

        assert!(normalized.contains("@auth:subject=1234"));
        assert!(normalized.contains("@auth:commonname=superadmin"));
    }

    #[tokio::test]
    async fn test_verify_refusal_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let config = ClientConfig::new(server.uri())
            .unwrap()
            .with_retry(RetryPolicy::default().with_delay(Duration::from_millis(1)));
        let err = AuthorityClient::new(config)
            .unwrap()
            .verify(&CallContext::new(), "bad-token")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthnError::Rejected(_)));
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_verify_null_claims_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"claims": null})))
            .mount(&server)
            .await;

        let err = client(&server)
            .verify(&CallContext::new(), "token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Rejected(m) if m == "No claims returned"));
    }

    #[tokio::test]
    async fn test_verify_garbage_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server)
            .verify(&CallContext::new(), "token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_verify_refuses_oversized_token_locally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims_body()))
            .expect(0)
            .mount(&server)
            .await;

        let token = "a".repeat(common::jwt::MAX_JWT_SIZE_BYTES + 1);
        let err = client(&server)
            .verify(&CallContext::new(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Claims(ClaimsError::TokenTooLarge)));
    }

    #[tokio::test]
    async fn test_issue_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/issue"))
            .and(body_partial_json(serde_json::json!({
                "realm": "Vince",
                "validity": "60s",
                "metadata": {"vinceAccount": "acme", "vinceOTP": "123456"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token": "issued.jwt", "realm": "Vince"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .issue_from_vince(
                &CallContext::new(),
                "acme",
                &SecretString::from("hunter2"),
                "123456",
                Duration::from_secs(60),
                IssueOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(token, "issued.jwt");
    }

    #[tokio::test]
    async fn test_issue_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/issue"))
            .and(body_partial_json(serde_json::json!({
                "realm": "OIDC",
                "metadata": {"OIDCProviderName": "okta", "namespace": "/acme"}
            })))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", "https://idp.example.com/auth"),
            )
            .mount(&server)
            .await;

        let location = client(&server)
            .issue_from_oidc_step1(
                &CallContext::new(),
                "/acme",
                "okta",
                "https://app.example.com/callback",
            )
            .await
            .unwrap();
        assert_eq!(location, "https://idp.example.com/auth");
    }

    #[tokio::test]
    async fn test_issue_error_list_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!([{
                "code": 403,
                "title": "Forbidden",
                "description": "account is locked",
                "subject": "midgard"
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_from_google(
                &CallContext::new(),
                "google-jwt",
                Duration::from_secs(60),
                IssueOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            AuthnError::Authority(errors)
                if errors.len() == 1
                    && errors.first().is_some_and(|e| e.description == "account is locked")
        ));
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_issue_undecodable_error_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_token(&CallContext::new(), &IssueRequest::new(Realm::Google))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Protocol(m) if m.contains("422")));
    }

    #[tokio::test]
    async fn test_certificate_issuance_requires_client_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_from_certificate(&CallContext::new(), Duration::from_secs(60), IssueOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_aws_issuance_falls_back_to_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta-data/iam/security-credentials/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("role"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/meta-data/iam/security-credentials/role"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "AccessKeyId": "AKIA",
                "SecretAccessKey": "secret-key",
                "Token": "session"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/issue"))
            .and(body_partial_json(serde_json::json!({
                "realm": "AWSSecurityToken",
                "metadata": {"accessKeyID": "AKIA", "secretAccessKey": "secret-key", "token": "session"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "aws.jwt"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .with_metadata_endpoints(MetadataEndpoints::all_at(&server.uri()))
            .issue_from_aws_security_token(
                &CallContext::new(),
                None,
                Duration::from_secs(60),
                IssueOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(token, "aws.jwt");
    }

    #[tokio::test]
    async fn test_issue_from_identity_checks_locally_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server)
            .issue_from_identity(
                &CallContext::new(),
                &crate::identity::CertificateIdentity,
                b"not a certificate".as_slice(),
                Duration::from_secs(60),
                IssueOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Identity(_)));
    }
}
