//! Client error types.
//!
//! The taxonomy is precise internally so callers can branch on the variant
//! (retry, re-issue, alert), but every verification failure collapses to the
//! same outward message via [`AuthnError::public_message`] so an
//! unauthenticated caller learns nothing about why a token was refused.

use common::redact::snip;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

pub use crate::claims::ClaimsError;
pub use crate::identity::IdentityError;

/// One entry of the JSON error list returned by the authority on a refused
/// issuance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorityError {
    /// HTTP-like status code reported by the authority.
    #[serde(default)]
    pub code: u16,

    /// Short title (e.g. "Invalid user").
    #[serde(default)]
    pub title: String,

    /// Human readable description.
    #[serde(default)]
    pub description: String,

    /// Component that produced the error.
    #[serde(default)]
    pub subject: String,
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {} ({}): {}", self.code, self.title, self.description)
    }
}

impl AuthorityError {
    fn redact(self, token: &str) -> Self {
        Self {
            code: self.code,
            title: snip(&self.title, token),
            description: snip(&self.description, token),
            subject: snip(&self.subject, token),
        }
    }
}

fn join_authority_errors(errors: &[AuthorityError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by the authority client, the coalescer and the
/// authenticator facade.
///
/// - `Transport`: connection refused, timeout, DNS failure, gateway
///   unavailable. Retried by the default retry policy.
/// - `Tls`: certificate validity, unknown authority, hostname mismatch.
///   Never retried.
/// - `Rejected`, `Authority`, `Protocol`: the authority answered and refused
///   or answered garbage. Never retried.
/// - `Claims`, `Identity`: local validation failures.
/// - `Cancelled`, `DeadlineExceeded`: the caller's context stopped the work.
#[derive(Debug, Clone, Error)]
pub enum AuthnError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication rejected: {0}")]
    Rejected(String),

    #[error("Authority refused the request: {}", join_authority_errors(.0))]
    Authority(Vec<AuthorityError>),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid claims: {0}")]
    Claims(#[from] ClaimsError),

    #[error("Identity source error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthnError {
    /// Whether the default retry policy should try again after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthnError::Transport(_))
    }

    /// Whether this error means the presented credential was refused (as
    /// opposed to the authority being unreachable or the caller giving up).
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthnError::Rejected(_)
                | AuthnError::Authority(_)
                | AuthnError::Protocol(_)
                | AuthnError::Claims(_)
                | AuthnError::Identity(_)
        )
    }

    /// Message safe to return to an unauthenticated caller.
    ///
    /// All refusals are reported identically.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        if self.is_unauthorized() {
            "unauthorized"
        } else if matches!(self, AuthnError::Configuration(_)) {
            "internal error"
        } else {
            "authentication service unavailable"
        }
    }

    /// HTTP status a host service should answer with for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        if self.is_unauthorized() {
            401
        } else if matches!(self, AuthnError::Configuration(_)) {
            500
        } else {
            503
        }
    }

    /// Replace every occurrence of `token` in the carried text with the
    /// redaction marker.
    #[must_use]
    pub fn redact(self, token: &str) -> Self {
        if token.is_empty() {
            return self;
        }
        match self {
            AuthnError::Transport(msg) => AuthnError::Transport(snip(&msg, token)),
            AuthnError::Tls(msg) => AuthnError::Tls(snip(&msg, token)),
            AuthnError::Rejected(msg) => AuthnError::Rejected(snip(&msg, token)),
            AuthnError::Protocol(msg) => AuthnError::Protocol(snip(&msg, token)),
            AuthnError::Configuration(msg) => AuthnError::Configuration(snip(&msg, token)),
            AuthnError::Authority(errors) => {
                AuthnError::Authority(errors.into_iter().map(|e| e.redact(token)).collect())
            }
            AuthnError::Identity(e) => AuthnError::Identity(e.redact(token)),
            other @ (AuthnError::Claims(_) | AuthnError::Cancelled | AuthnError::DeadlineExceeded) => {
                other
            }
        }
    }
}
