//! Authenticator integration tests
//!
//! Exercise the cached, coalesced authentication path against a mock
//! authority and against a local signing key.

use authn_client::claims::ClaimsError;
use authn_client::config::{AuthenticatorConfig, ClientConfig};
use authn_client::transport::{AuthorityClient, RetryPolicy};
use authn_client::{Authenticator, AuthnError, CallContext};
use authn_test_utils::{
    CapturedLogs, CountingVerifier, MockAuthority, TestClaimsBuilder, TestTokenSigner,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helper Functions
// ============================================================================

fn certificate_claims_body() -> serde_json::Value {
    TestClaimsBuilder::new()
        .for_subject("1234")
        .with_data("commonName", "superadmin")
        .with_data("organization", "aporeto.com")
        .build_auth_body()
}

// ============================================================================
// Remote verification
// ============================================================================

#[tokio::test]
async fn test_concurrent_authentications_share_one_verification() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority
        .expect_verify_delayed("tok", certificate_claims_body(), Duration::from_millis(200), 1)
        .await;

    let auth = Authenticator::new(AuthenticatorConfig::default(), Arc::new(authority.client()));
    let ctx = CallContext::new();

    let results = join_all((0..50).map(|_| auth.authenticate(&ctx, "tok"))).await;

    for result in results {
        let claims = result?;
        assert_eq!(
            claims.into_vec(),
            vec![
                "@auth:commonname=superadmin",
                "@auth:organization=aporeto.com",
                "@auth:subject=1234",
            ]
        );
    }
    assert!(auth.is_cached("tok"));

    Ok(())
}

#[tokio::test]
async fn test_refusal_is_not_cached() {
    let authority = MockAuthority::start().await;
    authority.expect_verify_status("bad", 403, 2).await;

    let auth = Authenticator::new(AuthenticatorConfig::default(), Arc::new(authority.client()));
    let ctx = CallContext::new();

    for _ in 0..2 {
        let err = auth.authenticate(&ctx, "bad").await.unwrap_err();
        assert!(matches!(err, AuthnError::Rejected(_)));
        assert_eq!(err.public_message(), "unauthorized");
        assert_eq!(err.status_code(), 401);
        assert!(!auth.is_cached("bad"));
    }
}

#[tokio::test]
async fn test_cached_entry_expires() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.expect_verify("tok", certificate_claims_body(), 2).await;

    let config = AuthenticatorConfig::new(Duration::from_millis(300));
    let auth = Authenticator::new(config, Arc::new(authority.client()));
    let ctx = CallContext::new();

    auth.authenticate(&ctx, "tok").await?;
    auth.authenticate(&ctx, "tok").await?;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!auth.is_cached("tok"));
    auth.authenticate(&ctx, "tok").await?;

    Ok(())
}

#[tokio::test]
async fn test_gateway_unavailable_is_retried() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.fail_verify_times("tok", 503, 2).await;
    authority.expect_verify("tok", certificate_claims_body(), 1).await;

    let client = authority.retrying_client(Duration::from_millis(10));
    let auth = Authenticator::new(AuthenticatorConfig::default(), Arc::new(client));

    let claims = auth.authenticate(&CallContext::new(), "tok").await?;
    assert_eq!(claims.subject(), Some("1234"));

    Ok(())
}

#[tokio::test]
async fn test_unreachable_authority_error_never_contains_token() {
    let token = "secret-token-value-that-must-not-leak";
    let config = ClientConfig::new("http://127.0.0.1:1")
        .unwrap()
        .with_retry(RetryPolicy::no_retry());
    let auth = Authenticator::new(
        AuthenticatorConfig::default(),
        Arc::new(AuthorityClient::new(config).unwrap()),
    );

    let err = auth.authenticate(&CallContext::new(), token).await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.public_message(), "authentication service unavailable");
    assert!(!err.to_string().contains(token));
    assert!(!format!("{err:?}").contains(token));
}

#[tokio::test]
async fn test_deadline_frees_the_token_for_the_next_caller() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority
        .expect_verify_delayed("tok", certificate_claims_body(), Duration::from_millis(300), 2)
        .await;

    let auth = Authenticator::new(AuthenticatorConfig::default(), Arc::new(authority.client()));

    let hurried = CallContext::new().with_timeout(Duration::from_millis(50));
    let err = auth.authenticate(&hurried, "tok").await.unwrap_err();
    assert!(matches!(err, AuthnError::DeadlineExceeded));
    assert!(!auth.is_cached("tok"));

    let claims = auth.authenticate(&CallContext::new(), "tok").await?;
    assert_eq!(claims.subject(), Some("1234"));

    Ok(())
}

// ============================================================================
// Local verification
// ============================================================================

#[tokio::test]
async fn test_local_verification_is_coalesced() -> Result<(), anyhow::Error> {
    let signer = TestTokenSigner::hmac(1);
    let token = signer.sign(
        &TestClaimsBuilder::new()
            .for_subject("superadmin")
            .with_data("organization", "aporeto.com")
            .build(),
    );

    let verifier = Arc::new(
        CountingVerifier::new(Arc::new(signer.verifier())).with_delay(Duration::from_millis(50)),
    );
    let auth = Authenticator::new(AuthenticatorConfig::default(), verifier.clone());
    let ctx = CallContext::new();

    let results = join_all((0..20).map(|_| auth.authenticate(&ctx, &token))).await;
    for result in results {
        assert!(result?.contains("@auth:organization=aporeto.com"));
    }
    assert_eq!(verifier.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_expired_and_foreign_tokens_are_refused() {
    let signer = TestTokenSigner::hmac(1);
    let auth = Authenticator::new(AuthenticatorConfig::default(), Arc::new(signer.verifier()));
    let ctx = CallContext::new();

    let expired = signer.sign(&TestClaimsBuilder::new().expires_in(-10).build());
    assert!(matches!(
        auth.authenticate(&ctx, &expired).await,
        Err(AuthnError::Claims(ClaimsError::Expired { .. }))
    ));

    let foreign = TestTokenSigner::hmac(2).sign(&TestClaimsBuilder::new().build());
    assert!(matches!(
        auth.authenticate(&ctx, &foreign).await,
        Err(AuthnError::Claims(ClaimsError::InvalidSignature))
    ));

    assert!(matches!(
        auth.authenticate(&ctx, "not-a-token").await,
        Err(AuthnError::Claims(ClaimsError::MalformedToken))
    ));
}

// ============================================================================
// Logging
// ============================================================================

#[tokio::test]
async fn test_tokens_never_appear_in_logs() {
    let (logs, _guard) = CapturedLogs::install();

    let token = "eyJhbGciOiJIUzI1NiJ9.c2VjcmV0LXBheWxvYWQ.c2lnbmF0dXJl";
    let authority = MockAuthority::start().await;
    authority.expect_verify_status(token, 403, 1).await;

    let auth = Authenticator::new(AuthenticatorConfig::default(), Arc::new(authority.client()));
    auth.authenticate(&CallContext::new(), token).await.unwrap_err();

    let contents = logs.contents();
    assert!(contents.contains("authn."));
    assert!(!contents.contains(token));
}
