//! Instrumented verifiers for authenticator tests

use async_trait::async_trait;
use authn_client::claims::ClaimSet;
use authn_client::context::CallContext;
use authn_client::errors::AuthnError;
use authn_client::transport::TokenVerifier;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a verifier, counting calls and optionally slowing each one down.
pub struct CountingVerifier {
    inner: Arc<dyn TokenVerifier>,
    calls: AtomicU32,
    delay: Duration,
}

impl CountingVerifier {
    pub fn new(inner: Arc<dyn TokenVerifier>) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep `delay` before delegating, to widen the in-flight window.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for CountingVerifier {
    async fn verify(&self, ctx: &CallContext, token: &str) -> Result<ClaimSet, AuthnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            ctx.sleep(self.delay).await?;
        }
        self.inner.verify(ctx, token).await
    }
}
