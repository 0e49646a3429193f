//! Signing and verification of claim sets as compact JWTs.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - The header algorithm is checked against the key's algorithm family
//!   BEFORE any signature work, so an HMAC key can never be used to verify
//!   an asymmetric token (or the reverse)
//! - Expiry is checked with no leeway: `exp == now` is expired
//! - Audience and issuer are compared exactly when configured

use super::model::ClaimSet;
use super::normalize::NormalizedClaims;
use crate::config::CodecConfig;
use common::jwt::{check_size, peek_algorithm, TokenShapeError};
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use x509_parser::prelude::{FromDer, X509Certificate};

// =============================================================================
// Errors
// =============================================================================

/// Reasons a token fails to encode or decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimsError {
    #[error("token exceeds the maximum allowed size")]
    TokenTooLarge,

    #[error("token is malformed")]
    MalformedToken,

    #[error("unexpected signing method: {0}")]
    UnexpectedSigningMethod(String),

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("audience '{0}' is not acceptable")]
    AudienceMismatch(String),

    #[error("issuer '{0}' is not acceptable")]
    IssuerMismatch(String),

    #[error("token is expired by {}s", .overrun.as_secs())]
    Expired { overrun: Duration },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unable to encode token: {0}")]
    Encoding(String),
}

impl From<TokenShapeError> for ClaimsError {
    fn from(err: TokenShapeError) -> Self {
        match err {
            TokenShapeError::TokenTooLarge => ClaimsError::TokenTooLarge,
            TokenShapeError::MissingAlgorithm => {
                ClaimsError::UnexpectedSigningMethod(String::new())
            }
            TokenShapeError::MalformedToken
            | TokenShapeError::MissingAuthorization
            | TokenShapeError::InvalidAuthorization => ClaimsError::MalformedToken,
        }
    }
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error, alg: &str) -> ClaimsError {
    match err.kind() {
        ErrorKind::InvalidSignature => ClaimsError::InvalidSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            ClaimsError::UnexpectedSigningMethod(alg.to_string())
        }
        ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat | ErrorKind::InvalidRsaKey(_) => {
            ClaimsError::InvalidKey(err.to_string())
        }
        _ => ClaimsError::MalformedToken,
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Algorithm families a verification key can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Hmac,
    Ecdsa,
}

/// Key used to sign tokens.
#[derive(Clone)]
pub struct SigningKey {
    key: EncodingKey,
    algorithm: Algorithm,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SigningKey {
    /// HS256 with a shared secret.
    #[must_use]
    pub fn hmac(secret: &SecretBox<[u8]>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.expose_secret()),
            algorithm: Algorithm::HS256,
        }
    }

    /// ES256 with a PKCS#8 PEM encoded P-256 private key.
    ///
    /// # Errors
    ///
    /// `InvalidKey` if the PEM cannot be parsed as an EC key.
    pub fn ecdsa_from_pem(pem: &[u8]) -> Result<Self, ClaimsError> {
        let key = EncodingKey::from_ec_pem(pem).map_err(|e| ClaimsError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key,
            algorithm: Algorithm::ES256,
        })
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

/// Key used to verify tokens, bound to the algorithms it may accept.
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
    family: AlgorithmFamily,
    algorithms: Vec<Algorithm>,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("family", &self.family)
            .field("algorithms", &self.algorithms)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl VerificationKey {
    /// Shared-secret verification (HS256, HS384, HS512).
    #[must_use]
    pub fn hmac(secret: &SecretBox<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.expose_secret()),
            family: AlgorithmFamily::Hmac,
            algorithms: vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
        }
    }

    /// ECDSA verification using the public key of a DER encoded certificate.
    ///
    /// P-256 keys accept ES256 and P-384 keys accept ES384.
    ///
    /// # Errors
    ///
    /// `InvalidKey` if the certificate cannot be parsed or does not carry an
    /// EC public key on a supported curve.
    pub fn ecdsa_from_certificate_der(der: &[u8]) -> Result<Self, ClaimsError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| ClaimsError::InvalidKey(format!("unable to parse certificate: {e}")))?;

        let spki = cert.public_key();
        if spki.algorithm.algorithm != x509_parser::oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY {
            return Err(ClaimsError::InvalidKey(
                "certificate public key is not an EC key".to_string(),
            ));
        }

        let point: &[u8] = &spki.subject_public_key.data;
        Self::ecdsa_from_point(point)
    }

    /// ECDSA verification with an uncompressed SEC1 public point.
    ///
    /// # Errors
    ///
    /// `InvalidKey` if the point length matches no supported curve.
    pub fn ecdsa_from_point(point: &[u8]) -> Result<Self, ClaimsError> {
        let algorithm = match point.len() {
            65 => Algorithm::ES256,
            97 => Algorithm::ES384,
            n => {
                return Err(ClaimsError::InvalidKey(format!(
                    "unsupported EC public key length {n}"
                )))
            }
        };

        Ok(Self {
            key: DecodingKey::from_ec_der(point),
            family: AlgorithmFamily::Ecdsa,
            algorithms: vec![algorithm],
        })
    }

    #[must_use]
    pub fn family(&self) -> AlgorithmFamily {
        self.family
    }

    /// Refuse any header algorithm outside this key's family.
    fn check_algorithm(&self, alg: &str) -> Result<Algorithm, ClaimsError> {
        let parsed = Algorithm::from_str(alg)
            .map_err(|_| ClaimsError::UnexpectedSigningMethod(alg.to_string()))?;

        if !self.algorithms.contains(&parsed) {
            tracing::debug!(
                target: "authn.claims",
                alg = %alg,
                family = ?self.family,
                "Token rejected: unexpected signing method"
            );
            return Err(ClaimsError::UnexpectedSigningMethod(alg.to_string()));
        }

        Ok(parsed)
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes and verifies claim sets for one issuer/audience pair.
#[derive(Debug, Clone)]
pub struct ClaimsCodec {
    config: CodecConfig,
}

impl ClaimsCodec {
    #[must_use]
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Sign `claims` as-is.
    ///
    /// # Errors
    ///
    /// `Encoding` if serialization or signing fails.
    pub fn encode(&self, claims: &ClaimSet, key: &SigningKey) -> Result<String, ClaimsError> {
        jsonwebtoken::encode(&Header::new(key.algorithm), claims, &key.key)
            .map_err(|e| ClaimsError::Encoding(e.to_string()))
    }

    /// Stamp the validity envelope on `draft` and sign it.
    ///
    /// `iss` and `aud` come from the codec configuration, `iat` is now and
    /// `exp` is `iat + validity`. Returns the final claim set alongside the
    /// token.
    ///
    /// # Errors
    ///
    /// `Encoding` if the validity overflows or signing fails.
    pub fn issue(
        &self,
        draft: ClaimSet,
        validity: Duration,
        key: &SigningKey,
    ) -> Result<(ClaimSet, String), ClaimsError> {
        self.issue_at(draft, validity, key, now_timestamp())
    }

    /// [`ClaimsCodec::issue`] with an explicit issuance time.
    ///
    /// # Errors
    ///
    /// `Encoding` if the validity overflows or signing fails.
    pub fn issue_at(
        &self,
        mut draft: ClaimSet,
        validity: Duration,
        key: &SigningKey,
        now: i64,
    ) -> Result<(ClaimSet, String), ClaimsError> {
        let validity_secs = i64::try_from(validity.as_secs())
            .map_err(|_| ClaimsError::Encoding("validity is too large".to_string()))?;
        let exp = now
            .checked_add(validity_secs)
            .ok_or_else(|| ClaimsError::Encoding("validity is too large".to_string()))?;

        draft.envelope.iss.clone_from(&self.config.issuer);
        draft.envelope.aud.clone_from(&self.config.audience);
        draft.envelope.iat = now;
        draft.envelope.exp = exp;

        let token = self.encode(&draft, key)?;
        Ok((draft, token))
    }

    /// Verify `token` and return its claim set.
    ///
    /// # Errors
    ///
    /// One [`ClaimsError`] variant per failed rule.
    pub fn decode(&self, token: &str, key: &VerificationKey) -> Result<ClaimSet, ClaimsError> {
        self.decode_at(token, key, now_timestamp())
    }

    /// [`ClaimsCodec::decode`] against an explicit verification clock.
    ///
    /// # Errors
    ///
    /// One [`ClaimsError`] variant per failed rule.
    pub fn decode_at(
        &self,
        token: &str,
        key: &VerificationKey,
        now: i64,
    ) -> Result<ClaimSet, ClaimsError> {
        let claims = verify_signature(token, key)?;

        validate_expiry(claims.envelope.exp, now, true)?;

        if !self.config.audience.is_empty() && claims.envelope.aud != self.config.audience {
            tracing::debug!(target: "authn.claims", aud = %claims.envelope.aud, "Token rejected: audience mismatch");
            return Err(ClaimsError::AudienceMismatch(claims.envelope.aud));
        }

        if !self.config.issuer.is_empty() && claims.envelope.iss != self.config.issuer {
            tracing::debug!(target: "authn.claims", iss = %claims.envelope.iss, "Token rejected: issuer mismatch");
            return Err(ClaimsError::IssuerMismatch(claims.envelope.iss));
        }

        Ok(claims)
    }

    /// Verify and normalize in one step.
    ///
    /// # Errors
    ///
    /// Same as [`ClaimsCodec::decode`].
    pub fn decode_normalized(
        &self,
        token: &str,
        key: &VerificationKey,
    ) -> Result<NormalizedClaims, ClaimsError> {
        self.decode(token, key).map(|c| NormalizedClaims::from_claims(&c))
    }
}

// =============================================================================
// Free functions
// =============================================================================

/// Verify a token signed by the authority's ECDSA certificate.
///
/// Audience and issuer are not checked; expiry is checked when present.
///
/// # Errors
///
/// `InvalidKey` for a non-EC certificate, `UnexpectedSigningMethod` for
/// any non-ECDSA token, plus the usual signature and expiry failures.
pub fn verify_token_locally(token: &str, certificate_der: &[u8]) -> Result<ClaimSet, ClaimsError> {
    let key = VerificationKey::ecdsa_from_certificate_der(certificate_der)?;
    let claims = verify_signature(token, &key)?;
    validate_expiry(claims.envelope.exp, now_timestamp(), false)?;
    Ok(claims)
}

/// Read the normalized claims of a token WITHOUT verifying it.
///
/// Only for tokens that were already verified by other means.
///
/// # Errors
///
/// `TokenTooLarge` or `MalformedToken`.
pub fn unsecure_claims_from_token(token: &str) -> Result<NormalizedClaims, ClaimsError> {
    check_size(token)?;

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<ClaimSet>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| map_jwt_error(&e, ""))?;

    Ok(NormalizedClaims::from_claims(&data.claims))
}

fn verify_signature(token: &str, key: &VerificationKey) -> Result<ClaimSet, ClaimsError> {
    let alg = peek_algorithm(token)?;
    let algorithm = key.check_algorithm(&alg)?;

    let mut validation = Validation::new(algorithm);
    validation.algorithms.clone_from(&key.algorithms);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.required_spec_claims.clear();

    jsonwebtoken::decode::<ClaimSet>(token, &key.key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(target: "authn.claims", error = %e, "Token verification failed");
            map_jwt_error(&e, &alg)
        })
}

/// `exp <= now` is expired. A zero `exp` fails only when `required`.
fn validate_expiry(exp: i64, now: i64, required: bool) -> Result<(), ClaimsError> {
    if exp == 0 {
        return if required {
            Err(ClaimsError::MalformedToken)
        } else {
            Ok(())
        };
    }

    if exp <= now {
        let overrun = u64::try_from(now.saturating_sub(exp)).unwrap_or(0);
        tracing::debug!(target: "authn.claims", exp, now, "Token rejected: expired");
        return Err(ClaimsError::Expired {
            overrun: Duration::from_secs(overrun),
        });
    }

    Ok(())
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Tests
// =============================================================================
