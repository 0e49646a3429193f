//! Renewal integration tests
//!
//! Certificate-realm renewal against the mock authority, on a shortened tick.

use authn_client::renewal::x509_renewer;
use authn_client::CallContext;
use authn_test_utils::{MockAuthority, TestCertificateBuilder};
use std::time::Duration;

#[tokio::test]
async fn test_x509_renewer_issues_then_renews() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.expect_issue("Certificate", "cert-token", 2).await;

    let cert = TestCertificateBuilder::new().build();
    let client = authority.client_with_tls(cert.tls_material());
    let renewer = x509_renewer(client, Duration::from_secs(2)).with_tick(Duration::from_millis(100));

    let ctx = CallContext::new();
    assert_eq!(renewer.issue(&ctx).await?, "cert-token");

    let (task, mut tokens) = renewer.spawn(ctx.child());
    let renewed = tokio::time::timeout(Duration::from_secs(5), tokens.recv()).await?;
    assert_eq!(renewed.as_deref(), Some("cert-token"));

    ctx.cancel();
    task.await?;
    assert!(tokens.recv().await.is_none());

    let bodies = authority.issue_bodies().await;
    assert!(bodies.iter().all(|b| b["validity"] == "2s"));

    Ok(())
}

#[tokio::test]
async fn test_renewal_survives_authority_outage() -> Result<(), anyhow::Error> {
    let authority = MockAuthority::start().await;
    authority.fail_issue_times(503, 2).await;
    authority.expect_issue("Certificate", "cert-token", 1).await;

    let cert = TestCertificateBuilder::new().build();
    let client = authority.client_with_tls(cert.tls_material());
    let renewer = x509_renewer(client, Duration::from_secs(2))
        .with_tick(Duration::from_millis(50))
        .with_attempt_timeout(Duration::from_secs(1));

    let ctx = CallContext::new();
    let (task, mut tokens) = renewer.spawn(ctx.child());

    let renewed = tokio::time::timeout(Duration::from_secs(5), tokens.recv()).await?;
    assert_eq!(renewed.as_deref(), Some("cert-token"));
    assert_eq!(authority.issue_bodies().await.len(), 3);

    ctx.cancel();
    task.await?;

    Ok(())
}
