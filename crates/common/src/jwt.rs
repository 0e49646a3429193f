//! Compact token helpers shared across the authn crates.
//!
//! This module provides the small, signature-agnostic pieces of token
//! handling:
//! - Size limits for DoS prevention
//! - Header algorithm peeking (used to reject algorithm confusion before any
//!   key material is touched)
//! - `Authorization: Bearer <token>` extraction
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Peeking at the header does NOT verify anything; the token must still be
//!   verified by the claims codec

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed token size in bytes (8KB).
///
/// Tokens larger than this are rejected BEFORE base64 decoding or any
/// cryptographic operation.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Scheme expected in the `Authorization` header.
pub const BEARER_SCHEME: &str = "Bearer";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting a compact token or header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenShapeError {
    /// Token size exceeds maximum allowed.
    #[error("token exceeds the maximum allowed size")]
    TokenTooLarge,

    /// Token is not `header.payload.signature` or its header is not JSON.
    #[error("token is not a well-formed compact token")]
    MalformedToken,

    /// Header has no usable `alg` field.
    #[error("token header does not declare a signing algorithm")]
    MissingAlgorithm,

    /// `Authorization` header absent or empty.
    #[error("missing authorization header")]
    MissingAuthorization,

    /// `Authorization` header is not `Bearer <token>`.
    #[error("invalid authorization header")]
    InvalidAuthorization,
}

// =============================================================================
// Functions
// =============================================================================

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `TokenShapeError::TokenTooLarge` when the limit is exceeded.
pub fn check_size(token: &str) -> Result<(), TokenShapeError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(TokenShapeError::TokenTooLarge);
    }
    Ok(())
}

/// Read the `alg` value from a compact token header without verifying it.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds the size limit
/// - `MalformedToken` - wrong number of segments, bad base64 or bad JSON
/// - `MissingAlgorithm` - header has no string `alg`
pub fn peek_algorithm(token: &str) -> Result<String, TokenShapeError> {
    check_size(token)?;

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid compact format");
        return Err(TokenShapeError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode token header base64");
        TokenShapeError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse token header JSON");
        TokenShapeError::MalformedToken
    })?;

    header
        .get("alg")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(TokenShapeError::MissingAlgorithm)
}

/// Extract the token from an `Authorization` header value.
///
/// The header must be exactly `Bearer <token>`.
///
/// # Errors
///
/// - `MissingAuthorization` - header value absent or empty
/// - `InvalidAuthorization` - wrong scheme or wrong number of parts
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str, TokenShapeError> {
    let value = header
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(TokenShapeError::MissingAuthorization)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEARER_SCHEME), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(TokenShapeError::InvalidAuthorization),
    }
}

/// Find the token presented with a request.
///
/// The `Authorization` header wins when present (any `<scheme> <token>`
/// form); otherwise the `token` query parameter is used. Returns `None` when
/// neither carries a value.
#[must_use]
pub fn token_from_request<'a>(
    authorization: Option<&'a str>,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    if let Some(header) = authorization.filter(|h| !h.is_empty()) {
        return header.split_once(' ').map(|(_, token)| token);
    }
    query_token.filter(|t| !t.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
