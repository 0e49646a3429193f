//! Mock authority for integration tests
//!
//! Wraps a `wiremock` server answering the authority's `POST /issue` and
//! `GET /auth` endpoints. Expectations set with a call count are verified
//! when the harness is dropped.

use authn_client::config::ClientConfig;
use authn_client::transport::{AuthorityClient, RetryPolicy, TlsMaterial};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test authority server.
///
/// # Example
/// ```rust,ignore
/// let authority = MockAuthority::start().await;
/// authority.expect_verify("tok", TestClaimsBuilder::new().build_auth_body(), 1).await;
/// let claims = authority.client().verify(&CallContext::new(), "tok").await?;
/// ```
pub struct MockAuthority {
    server: MockServer,
}

impl MockAuthority {
    /// Start on a random local port
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Client configuration pointing at this server, without retries.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.server.uri())
            .expect("mock server URI must be valid")
            .with_retry(RetryPolicy::no_retry())
    }

    pub fn client(&self) -> AuthorityClient {
        AuthorityClient::new(self.client_config()).expect("client must build")
    }

    /// Client retrying transient failures every `delay`.
    pub fn retrying_client(&self, delay: Duration) -> AuthorityClient {
        let config = self
            .client_config()
            .with_retry(RetryPolicy::default().with_delay(delay).with_max_attempts(5));
        AuthorityClient::new(config).expect("client must build")
    }

    /// Client presenting `tls` as its identity.
    pub fn client_with_tls(&self, tls: TlsMaterial) -> AuthorityClient {
        AuthorityClient::new(self.client_config().with_tls(tls)).expect("client must build")
    }

    // =========================================================================
    // Verification endpoint
    // =========================================================================

    /// Answer `GET /auth?token=<token>` with 200 and `body`, `calls` times.
    pub async fn expect_verify(&self, token: &str, body: serde_json::Value, calls: u64) {
        self.mount_verify(token, ResponseTemplate::new(200).set_body_json(body), calls)
            .await;
    }

    /// Like [`MockAuthority::expect_verify`] but answering after `delay`.
    pub async fn expect_verify_delayed(
        &self,
        token: &str,
        body: serde_json::Value,
        delay: Duration,
        calls: u64,
    ) {
        let response = ResponseTemplate::new(200)
            .set_body_json(body)
            .set_delay(delay);
        self.mount_verify(token, response, calls).await;
    }

    /// Answer `GET /auth?token=<token>` with a bare `status`, `calls` times.
    pub async fn expect_verify_status(&self, token: &str, status: u16, calls: u64) {
        self.mount_verify(token, ResponseTemplate::new(status), calls)
            .await;
    }

    /// Answer with a bare `status` for the first `times` calls only.
    pub async fn fail_verify_times(&self, token: &str, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(query_param("token", token))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    async fn mount_verify(&self, token: &str, response: ResponseTemplate, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(query_param("token", token))
            .respond_with(response)
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    // =========================================================================
    // Issuance endpoint
    // =========================================================================

    /// Answer `POST /issue` for `realm` with `token`, `calls` times.
    pub async fn expect_issue(&self, realm: &str, token: &str, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/issue"))
            .and(body_partial_json(serde_json::json!({ "realm": realm })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": token
            })))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer any `POST /issue` with `status` and the authority error list.
    pub async fn refuse_issue(&self, status: u16, title: &str, description: &str) {
        Mock::given(method("POST"))
            .and(path("/issue"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!([{
                "code": status,
                "title": title,
                "description": description,
                "subject": "midgard"
            }])))
            .mount(&self.server)
            .await;
    }

    /// Answer any `POST /issue` with a bare `status` for the first `times` calls.
    pub async fn fail_issue_times(&self, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path("/issue"))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Body of every received `POST /issue`, decoded.
    pub async fn issue_bodies(&self) -> Vec<serde_json::Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == "/issue")
            .map(|r| serde_json::from_slice(&r.body).expect("issue body must be JSON"))
            .collect()
    }
}
