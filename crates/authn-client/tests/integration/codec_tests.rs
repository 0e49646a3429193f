//! Token codec integration tests
//!
//! ECDSA tokens signed with a generated certificate's key, verified from
//! the certificate alone.

use authn_client::claims::{verify_token_locally, ClaimSet, ClaimsCodec, ClaimsError, SigningKey};
use authn_client::config::CodecConfig;
use authn_client::transport::{CodecVerifier, TokenVerifier};
use authn_client::CallContext;
use authn_test_utils::{TestCertificateBuilder, TestClaimsBuilder, TEST_AUDIENCE, TEST_ISSUER};
use common::secret::secret_bytes;
use std::time::Duration;

fn codec() -> ClaimsCodec {
    ClaimsCodec::new(CodecConfig::new(TEST_ISSUER, TEST_AUDIENCE))
}

#[test]
fn test_ecdsa_token_verifies_against_certificate() -> Result<(), anyhow::Error> {
    let cert = TestCertificateBuilder::new().build();
    let draft = ClaimSet::new("certificate", "1234").with_data("organization", "aporeto.com");

    let (issued, token) = codec().issue(draft, Duration::from_secs(600), &cert.signing_key())?;

    let claims = codec().decode(&token, &cert.verification_key())?;
    assert_eq!(claims, issued);

    let local = verify_token_locally(&token, &cert.certificate_der)?;
    assert_eq!(local.subject(), "1234");

    Ok(())
}

#[test]
fn test_public_key_used_as_hmac_secret_is_refused() {
    let cert = TestCertificateBuilder::new().build();

    let forged_key = SigningKey::hmac(&secret_bytes(&cert.certificate_der));
    let forged = codec()
        .encode(&TestClaimsBuilder::new().build(), &forged_key)
        .unwrap();

    assert_eq!(
        codec().decode(&forged, &cert.verification_key()),
        Err(ClaimsError::UnexpectedSigningMethod("HS256".to_string()))
    );
    assert_eq!(
        verify_token_locally(&forged, &cert.certificate_der),
        Err(ClaimsError::UnexpectedSigningMethod("HS256".to_string()))
    );
}

#[test]
fn test_token_from_another_certificate_is_refused() {
    let signer = TestCertificateBuilder::new().build();
    let other = TestCertificateBuilder::new().build();

    let token = codec()
        .encode(&TestClaimsBuilder::new().build(), &signer.signing_key())
        .unwrap();

    assert_eq!(
        codec().decode(&token, &other.verification_key()),
        Err(ClaimsError::InvalidSignature)
    );
}

#[test]
fn test_expiry_boundary() {
    let cert = TestCertificateBuilder::new().build();
    let now = 1_700_000_000;

    let claims = TestClaimsBuilder::new().expires_at(now).build();
    let token = codec().encode(&claims, &cert.signing_key()).unwrap();

    assert!(matches!(
        codec().decode_at(&token, &cert.verification_key(), now),
        Err(ClaimsError::Expired { .. })
    ));
    assert!(codec()
        .decode_at(&token, &cert.verification_key(), now - 1)
        .is_ok());
}

#[tokio::test]
async fn test_codec_verifier_checks_audience() {
    let cert = TestCertificateBuilder::new().build();
    let token = codec()
        .encode(
            &TestClaimsBuilder::new().audience("someone-else").build(),
            &cert.signing_key(),
        )
        .unwrap();

    let verifier = CodecVerifier::new(codec(), cert.verification_key());
    let err = verifier.verify(&CallContext::new(), &token).await.unwrap_err();

    assert_eq!(err.public_message(), "unauthorized");
    assert!(err.to_string().contains("someone-else"));
}
