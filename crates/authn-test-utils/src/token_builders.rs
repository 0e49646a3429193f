//! Builder patterns for test data construction
//!
//! Provides fluent APIs for creating claim sets and signed tokens.

use authn_client::claims::{ClaimSet, ClaimsCodec, SigningKey, VerificationKey};
use authn_client::config::CodecConfig;
use authn_client::transport::CodecVerifier;
use chrono::Utc;
use std::time::Duration;

pub const TEST_ISSUER: &str = "midgard.test";
pub const TEST_AUDIENCE: &str = "aporeto.com";

/// Builder for test claim sets
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new()
///     .realm("certificate")
///     .for_subject("1234")
///     .with_data("organization", "aporeto.com")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    claims: ClaimSet,
}

impl TestClaimsBuilder {
    /// Certificate realm, subject `test-subject`, valid for an hour
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        let mut claims = ClaimSet::new("certificate", "test-subject");
        claims.envelope.iss = TEST_ISSUER.to_string();
        claims.envelope.aud = TEST_AUDIENCE.to_string();
        claims.envelope.iat = now;
        claims.envelope.exp = now + 3600;
        Self { claims }
    }

    pub fn realm(mut self, realm: &str) -> Self {
        self.claims.realm = realm.to_string();
        self
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.claims.envelope.sub = subject.to_string();
        self
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.claims.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.claims.envelope.aud = audience.to_string();
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.claims.envelope.iss = issuer.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.envelope.exp = Utc::now().timestamp() + seconds;
        self
    }

    /// Set absolute expiration (`0` leaves it unset)
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.claims.envelope.exp = timestamp;
        self
    }

    pub fn build(self) -> ClaimSet {
        self.claims
    }

    /// The claim set as the authority's `GET /auth` success body
    pub fn build_auth_body(self) -> serde_json::Value {
        serde_json::json!({ "claims": self.claims })
    }
}

impl Default for TestClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Signs test tokens with a fixed key and codec configuration.
pub struct TestTokenSigner {
    codec: ClaimsCodec,
    signing_key: SigningKey,
    verification_key: VerificationKey,
}

impl TestTokenSigner {
    pub fn new(signing_key: SigningKey, verification_key: VerificationKey) -> Self {
        Self {
            codec: ClaimsCodec::new(CodecConfig::new(TEST_ISSUER, TEST_AUDIENCE)),
            signing_key,
            verification_key,
        }
    }

    /// HS256 signer for `seed`.
    pub fn hmac(seed: u8) -> Self {
        let (signing_key, verification_key) = crate::crypto_fixtures::test_hmac_keys(seed);
        Self::new(signing_key, verification_key)
    }

    pub fn codec(&self) -> &ClaimsCodec {
        &self.codec
    }

    /// Encode `claims` as-is, envelope included.
    pub fn sign(&self, claims: &ClaimSet) -> String {
        self.codec
            .encode(claims, &self.signing_key)
            .expect("test claims must encode")
    }

    /// Stamp the envelope (issuer, audience, now, now + validity) and sign.
    pub fn issue(&self, draft: ClaimSet, validity: Duration) -> String {
        let (_, token) = self
            .codec
            .issue(draft, validity, &self.signing_key)
            .expect("test claims must issue");
        token
    }

    /// A local verifier accepting this signer's tokens.
    pub fn verifier(&self) -> CodecVerifier {
        CodecVerifier::new(self.codec.clone(), self.verification_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creates_valid_claims() {
        let claims = TestClaimsBuilder::new()
            .for_subject("alice")
            .with_data("organization", "acme")
            .build();

        assert_eq!(claims.subject(), "alice");
        assert_eq!(claims.data["organization"], "acme");
        assert!(claims.envelope.exp > claims.envelope.iat);
    }

    #[test]
    fn test_signed_token_decodes() {
        let signer = TestTokenSigner::hmac(1);
        let token = signer.sign(&TestClaimsBuilder::new().build());
        let claims = signer
            .codec()
            .decode(&token, &crate::crypto_fixtures::test_hmac_keys(1).1)
            .unwrap();
        assert_eq!(claims.subject(), "test-subject");
    }
}
