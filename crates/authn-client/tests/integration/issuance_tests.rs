//! Issuance integration tests
//!
//! Each realm helper is driven against the mock authority, checking the
//! request body that reaches it and the error mapping of its answers.

use async_trait::async_trait;
use authn_client::identity::{
    CloudMetadataClient, DirectoryClient, DirectoryEntry, DirectoryIdentity, DirectoryInfo,
    GoogleIdentity, IdentityError, IdentitySource, MetadataEndpoints, LDAP_ADDRESS_KEY, LDAP_BASE_DN_KEY, LDAP_BIND_DN_KEY,
    LDAP_BIND_PASSWORD_KEY, LDAP_PASSWORD_KEY, LDAP_USERNAME_KEY,
};
use authn_client::transport::{AuthorityClient, RetryPolicy};
use authn_client::{AuthnError, CallContext, IssueOptions};
use authn_test_utils::{CapturedLogs, MockAuthority, TestCertificateBuilder};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const HOUR: Duration = Duration::from_secs(3600);

// ============================================================================
// Helper Functions
// ============================================================================

fn directory_info() -> DirectoryInfo {
    let metadata = HashMap::from([
        (LDAP_ADDRESS_KEY.to_string(), "ldap.example.com:636".to_string()),
        (LDAP_BIND_DN_KEY.to_string(), "cn=admin,dc=toto,dc=com".to_string()),
        (LDAP_BIND_PASSWORD_KEY.to_string(), "bind-secret".to_string()),
        (LDAP_BASE_DN_KEY.to_string(), "dc=toto,dc=com".to_string()),
        (LDAP_USERNAME_KEY.to_string(), "lsk".to_string()),
        (LDAP_PASSWORD_KEY.to_string(), "user-secret".to_string()),
    ]);
    DirectoryInfo::from_metadata(&metadata).unwrap()
}

struct SingleUserDirectory;

#[async_trait]
impl DirectoryClient for SingleUserDirectory {
    async fn search(
        &self,
        _info: &DirectoryInfo,
        _filter: &str,
    ) -> Result<Vec<DirectoryEntry>, IdentityError> {
        Ok(vec![DirectoryEntry {
            dn: "uid=lsk,ou=jedi,dc=toto,dc=com".to_string(),
            attributes: vec![
                ("uid".to_string(), vec!["lsk".to_string()]),
                ("cn".to_string(), vec!["Luke Skywalker".to_string()]),
            ],
        }])
    }

    async fn bind(
        &self,
        info: &DirectoryInfo,
        _dn: &str,
        password: &SecretString,
    ) -> Result<bool, IdentityError> {
        Ok(password.expose_secret() == info.password.expose_secret())
    }
}

// ============================================================================
// Certificate realm
// ============================================================================

#[tokio::test]
async fn test_certificate_issuance() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.expect_issue("Certificate", "issued-token", 1).await;

    let cert = TestCertificateBuilder::new().unit("admin").build();
    let client = authority.client_with_tls(cert.tls_material());

    let token = client
        .issue_from_certificate(&CallContext::new(), HOUR, IssueOptions::new().quota(5))
        .await?;
    assert_eq!(token, "issued-token");

    let bodies = authority.issue_bodies().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["validity"], "3600s");
    assert_eq!(bodies[0]["quota"], 5);

    Ok(())
}

#[tokio::test]
async fn test_certificate_issuance_requires_identity() {
    let authority = MockAuthority::start().await;

    let err = authority
        .client()
        .issue_from_certificate(&CallContext::new(), HOUR, IssueOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthnError::Configuration(_)));
    assert!(authority.issue_bodies().await.is_empty());
}

// ============================================================================
// Directory realm
// ============================================================================

#[tokio::test]
async fn test_ldap_issuance_sends_directory_metadata() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.expect_issue("LDAP", "ldap-token", 1).await;

    let token = authority
        .client()
        .issue_from_ldap(
            &CallContext::new(),
            &directory_info(),
            "/acme",
            "corp-ldap",
            HOUR,
            IssueOptions::new(),
        )
        .await?;
    assert_eq!(token, "ldap-token");

    let bodies = authority.issue_bodies().await;
    let metadata = &bodies[0]["metadata"];
    assert_eq!(metadata["LDAPUsername"], "lsk");
    assert_eq!(metadata["LDAPBindSearchFilter"], "(uid={USERNAME})");
    assert_eq!(metadata["LDAPConnSecurityProtocol"], "TLS");
    assert_eq!(metadata["namespace"], "/acme");
    assert_eq!(metadata["provider"], "corp-ldap");

    Ok(())
}

#[tokio::test]
async fn test_ldap_refusal_redacts_passwords() {
    let authority = MockAuthority::start().await;
    authority
        .refuse_issue(401, "Invalid user", "bind failed with password user-secret")
        .await;

    let err = authority
        .client()
        .issue_from_ldap(
            &CallContext::new(),
            &directory_info(),
            "/acme",
            "corp-ldap",
            HOUR,
            IssueOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        AuthnError::Authority(errors)
            if errors.len() == 1 && errors[0].title == "Invalid user"
    ));
    assert!(!err.to_string().contains("user-secret"));
    assert!(err.to_string().contains("[snip]"));
    assert_eq!(err.public_message(), "unauthorized");
}

#[tokio::test]
async fn test_issue_from_directory_identity() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.expect_issue("LDAP", "ldap-token", 1).await;

    let source = DirectoryIdentity::new(SingleUserDirectory);
    let token = authority
        .client()
        .issue_from_identity(&CallContext::new(), &source, &directory_info(), HOUR, IssueOptions::new())
        .await?;
    assert_eq!(token, "ldap-token");

    let bodies = authority.issue_bodies().await;
    let metadata = &bodies[0]["metadata"];
    assert_eq!(metadata["subject"], "lsk");
    assert_eq!(metadata["ou:jedi"], "true");

    Ok(())
}

#[tokio::test]
async fn test_wrong_directory_password_never_reaches_authority() {
    let authority = MockAuthority::start().await;

    let mut bad_info = directory_info();
    bad_info.password = SecretString::from("wrong");

    struct StrictDirectory;

    #[async_trait]
    impl DirectoryClient for StrictDirectory {
        async fn search(
            &self,
            info: &DirectoryInfo,
            filter: &str,
        ) -> Result<Vec<DirectoryEntry>, IdentityError> {
            SingleUserDirectory.search(info, filter).await
        }

        async fn bind(
            &self,
            _info: &DirectoryInfo,
            _dn: &str,
            password: &SecretString,
        ) -> Result<bool, IdentityError> {
            Ok(password.expose_secret() == "user-secret")
        }
    }

    let err = authority
        .client()
        .issue_from_identity(
            &CallContext::new(),
            &DirectoryIdentity::new(StrictDirectory),
            &bad_info,
            HOUR,
            IssueOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthnError::Identity(IdentityError::InvalidCredentials)
    ));
    assert!(authority.issue_bodies().await.is_empty());
}

// ============================================================================
// Retry behavior
// ============================================================================

#[tokio::test]
async fn test_gateway_errors_are_retried() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.fail_issue_times(503, 2).await;
    authority.expect_issue("Google", "google-token", 1).await;

    let token = authority
        .retrying_client(Duration::from_millis(10))
        .issue_from_google(&CallContext::new(), "google-jwt", HOUR, IssueOptions::new())
        .await?;

    assert_eq!(token, "google-token");
    assert_eq!(authority.issue_bodies().await.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_server_errors_are_not_retried() {
    let authority = MockAuthority::start().await;
    authority.fail_issue_times(500, 5).await;

    let err = authority
        .retrying_client(Duration::from_millis(10))
        .issue_from_google(&CallContext::new(), "google-jwt", HOUR, IssueOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthnError::Protocol(_)));
    assert_eq!(authority.issue_bodies().await.len(), 1);
}

#[tokio::test]
async fn test_deadline_stops_retrying() {
    let authority = MockAuthority::start().await;
    authority.fail_issue_times(503, 100).await;

    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
    let err = authority
        .retrying_client(Duration::from_millis(30))
        .issue_from_google(&ctx, "google-jwt", HOUR, IssueOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthnError::DeadlineExceeded | AuthnError::Transport(_)
    ));
}

// ============================================================================
// Redirect realms and cloud providers
// ============================================================================

#[tokio::test]
async fn test_oidc_first_step_returns_location() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    Mock::given(method("POST"))
        .and(path("/issue"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "https://idp.example.com/authorize"),
        )
        .expect(1)
        .mount(authority.server())
        .await;

    let location = authority
        .client()
        .issue_from_oidc_step1(
            &CallContext::new(),
            "/acme",
            "okta",
            "https://console.example.com/callback",
        )
        .await?;
    assert_eq!(location, "https://idp.example.com/authorize");

    let bodies = authority.issue_bodies().await;
    assert_eq!(bodies[0]["realm"], "OIDC");
    assert_eq!(bodies[0]["metadata"]["OIDCProviderName"], "okta");

    Ok(())
}

#[tokio::test]
async fn test_aws_issuance_from_instance_role() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path("/meta-data/iam/security-credentials/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("my-role\n"))
        .mount(authority.server())
        .await;
    Mock::given(method("GET"))
        .and(path("/meta-data/iam/security-credentials/my-role"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "AccessKeyId": "AKIA123",
            "SecretAccessKey": "aws-secret",
            "Token": "aws-session"
        })))
        .mount(authority.server())
        .await;
    authority.expect_issue("AWSSecurityToken", "aws-token", 1).await;

    let client = authority
        .client()
        .with_metadata_endpoints(MetadataEndpoints::all_at(&authority.uri()));
    let token = client
        .issue_from_aws_security_token(&CallContext::new(), None, HOUR, IssueOptions::new())
        .await?;
    assert_eq!(token, "aws-token");

    let bodies = authority.issue_bodies().await;
    assert_eq!(bodies[0]["metadata"]["accessKeyID"], "AKIA123");

    Ok(())
}

#[tokio::test]
async fn test_metadata_failure_is_reported_before_issuance() {
    let authority = MockAuthority::start().await;

    let metadata = CloudMetadataClient::new(reqwest::Client::new())
        .with_endpoints(MetadataEndpoints::all_at(&authority.uri()));
    assert!(metadata.gcp_identity_token().await.is_err());

    let err = authority
        .client()
        .with_metadata_endpoints(MetadataEndpoints::all_at(&authority.uri()))
        .issue_from_gcp_identity_token(&CallContext::new(), None, HOUR, IssueOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthnError::Identity(IdentityError::Metadata(_))));
    assert!(authority.issue_bodies().await.is_empty());
}

// ============================================================================
// Credentials in logs
// ============================================================================

/// Directory whose failures echo the bind password.
struct LeakyDirectory;

#[async_trait]
impl DirectoryClient for LeakyDirectory {
    async fn search(
        &self,
        info: &DirectoryInfo,
        _filter: &str,
    ) -> Result<Vec<DirectoryEntry>, IdentityError> {
        Err(IdentityError::Directory(format!(
            "search as {} with password {} refused",
            info.bind_dn,
            info.bind_password.expose_secret()
        )))
    }

    async fn bind(
        &self,
        _info: &DirectoryInfo,
        _dn: &str,
        _password: &SecretString,
    ) -> Result<bool, IdentityError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_unreachable_google_endpoint_never_logs_token() {
    let (logs, _guard) = CapturedLogs::install();
    let token = "eyJhbGciOiJSUzI1NiJ9.Z29vZ2xlLXNlY3JldA.c2ln";

    let google = GoogleIdentity::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1/tokeninfo",
        "client-123.apps.googleusercontent.com",
    );
    let err = google
        .produce_claim(&CallContext::new(), token)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(!err.to_string().contains(token));

    let contents = logs.contents();
    assert!(contents.contains("Google token refused"));
    assert!(!contents.contains(token));
}

#[tokio::test]
async fn test_directory_failure_never_logs_passwords() {
    let (logs, _guard) = CapturedLogs::install();

    let err = DirectoryIdentity::new(LeakyDirectory)
        .produce_claim(&CallContext::new(), &directory_info())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("[snip]"));
    assert!(!err.to_string().contains("bind-secret"));

    let contents = logs.contents();
    assert!(contents.contains("Directory login failed"));
    assert!(!contents.contains("bind-secret"));
}

#[tokio::test]
async fn test_issuance_refusal_never_logs_password() {
    let (logs, _guard) = CapturedLogs::install();
    let authority = MockAuthority::start().await;
    authority
        .refuse_issue(401, "Invalid user", "bind failed with password user-secret")
        .await;

    authority
        .client()
        .issue_from_ldap(
            &CallContext::new(),
            &directory_info(),
            "/acme",
            "corp-ldap",
            HOUR,
            IssueOptions::new(),
        )
        .await
        .unwrap_err();

    let contents = logs.contents();
    assert!(contents.contains("Issuance failed"));
    assert!(!contents.contains("user-secret"));
}

#[tokio::test]
async fn test_issuance_retries_never_log_password() {
    let (logs, _guard) = CapturedLogs::install();
    let authority = MockAuthority::start().await;
    authority
        .refuse_issue(400, "Busy", "try again, user-secret")
        .await;

    let retry = RetryPolicy::default()
        .with_delay(Duration::from_millis(10))
        .with_max_attempts(3)
        .with_retryable(|e| matches!(e, AuthnError::Authority(_)));
    let client = AuthorityClient::new(authority.client_config().with_retry(retry)).unwrap();

    let err = client
        .issue_from_ldap(
            &CallContext::new(),
            &directory_info(),
            "/acme",
            "corp-ldap",
            HOUR,
            IssueOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AuthnError::Authority(_)));
    assert_eq!(authority.issue_bodies().await.len(), 3);

    let contents = logs.contents();
    assert!(contents.contains("will retry"));
    assert!(!contents.contains("user-secret"));
}
