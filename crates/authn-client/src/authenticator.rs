//! Authentication facade for host services.
//!
//! Wraps a [`TokenVerifier`] with the single-flight cache so a burst of
//! requests presenting the same token costs one verification, and exposes
//! the optional policy and rate-limit hooks.

use crate::claims::{ClaimSet, ClaimsError, NormalizedClaims};
use crate::coalescer::RequestCoalescer;
use crate::config::AuthenticatorConfig;
use crate::context::CallContext;
use crate::errors::AuthnError;
use crate::observability::metrics;
use crate::transport::TokenVerifier;
use async_trait::async_trait;
use common::jwt::{extract_bearer_token, token_from_request};
use std::sync::Arc;
use tracing::instrument;

/// Outcome of a custom authentication policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Authenticated with these claims; the authority is not consulted.
    Accept(NormalizedClaims),
    /// Refused; the authority is not consulted.
    Reject,
    /// The policy does not apply; run the ordinary flow.
    Continue,
}

/// Per-deployment hook evaluated before the ordinary flow.
#[async_trait]
pub trait AuthPolicy: Send + Sync {
    /// # Errors
    ///
    /// Any error aborts the authentication with that error.
    async fn evaluate(&self, ctx: &CallContext, token: &str) -> Result<PolicyDecision, AuthnError>;
}

/// Rate limiter consulted for requests that are not already trusted.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether the request must be limited.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    async fn rate_limit(
        &self,
        authorization: Option<&str>,
        query_token: Option<&str>,
    ) -> Result<bool, AuthnError>;
}

/// Cached, coalesced token authentication.
pub struct Authenticator {
    config: AuthenticatorConfig,
    verifier: Arc<dyn TokenVerifier>,
    cache: RequestCoalescer<ClaimSet>,
    policy: Option<Arc<dyn AuthPolicy>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("policy", &self.policy.is_some())
            .field("rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(config: AuthenticatorConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        let cache = RequestCoalescer::new(config.cache_validity);
        Self {
            config,
            verifier,
            cache,
            policy: None,
            rate_limiter: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn AuthPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    /// Authenticate `token` and return its normalized claims.
    ///
    /// Concurrent calls for the same token share one verification, and a
    /// verified token is served from the cache for the configured validity.
    /// Failures are returned to every caller involved but never cached.
    ///
    /// # Errors
    ///
    /// The verifier's error, `Rejected` when the policy refuses, or
    /// `Cancelled` / `DeadlineExceeded` from `ctx`. Use
    /// [`AuthnError::public_message`] for what to tell the caller.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, ctx: &CallContext, token: &str) -> Result<NormalizedClaims, AuthnError> {
        if let Some(policy) = &self.policy {
            match policy.evaluate(ctx, token).await? {
                PolicyDecision::Accept(claims) => {
                    tracing::debug!(target: "authn.authenticator", "Accepted by policy");
                    return Ok(claims);
                }
                PolicyDecision::Reject => {
                    tracing::debug!(target: "authn.authenticator", "Rejected by policy");
                    return Err(AuthnError::Rejected(
                        "rejected by authentication policy".to_string(),
                    ));
                }
                PolicyDecision::Continue => {}
            }
        }

        let result = self
            .authenticate_claims(ctx, token)
            .await
            .map(|claims| NormalizedClaims::from_claims(&claims));

        metrics::record_verification(result.is_ok());
        match &result {
            Ok(claims) => {
                tracing::debug!(
                    target: "authn.authenticator",
                    subject = claims.subject().unwrap_or_default(),
                    "Token authenticated"
                );
            }
            Err(e) => {
                tracing::debug!(target: "authn.authenticator", error = %e, "Token refused");
            }
        }
        result
    }

    /// The verified claim set of `token`, through the cache. No policy.
    ///
    /// # Errors
    ///
    /// As [`Authenticator::authenticate`].
    pub async fn authenticate_claims(&self, ctx: &CallContext, token: &str) -> Result<ClaimSet, AuthnError> {
        if token.is_empty() {
            return Err(ClaimsError::MalformedToken.into());
        }

        let verifier = Arc::clone(&self.verifier);
        self.cache
            .get_or_fetch(ctx, token, || async move { verifier.verify(ctx, token).await })
            .await
            .map_err(|e| e.redact(token))
    }

    /// Authenticate the token of an `Authorization: Bearer` header value.
    ///
    /// # Errors
    ///
    /// `Claims(MalformedToken)` for a missing or malformed header, otherwise
    /// as [`Authenticator::authenticate`].
    pub async fn authenticate_bearer(
        &self,
        ctx: &CallContext,
        authorization: Option<&str>,
    ) -> Result<NormalizedClaims, AuthnError> {
        let token = extract_bearer_token(authorization).map_err(ClaimsError::from)?;
        self.authenticate(ctx, token).await
    }

    /// Whether a request must be rate limited.
    ///
    /// Requests presenting a token that is currently cached are never
    /// limited. Without a rate limiter nothing is.
    ///
    /// # Errors
    ///
    /// The rate limiter's error.
    pub async fn should_rate_limit(
        &self,
        authorization: Option<&str>,
        query_token: Option<&str>,
    ) -> Result<bool, AuthnError> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(false);
        };

        if token_from_request(authorization, query_token)
            .is_some_and(|token| !token.is_empty() && self.cache.is_cached(token))
        {
            return Ok(false);
        }

        limiter.rate_limit(authorization, query_token).await
    }

    /// Whether `token` is currently trusted from the cache.
    #[must_use]
    pub fn is_cached(&self, token: &str) -> bool {
        self.cache.is_cached(token)
    }

    /// Forget a cached token, forcing the next call to verify it again.
    pub fn invalidate(&self, token: &str) {
        self.cache.invalidate(token);
    }

    /// Drop expired cache entries; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}
