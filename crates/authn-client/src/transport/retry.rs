//! Retry policy shared by issuance and verification.
//!
//! One policy, one implementation: a fixed delay between attempts, an
//! optional bound on attempts or elapsed time, and a predicate deciding
//! which errors are worth another attempt. The caller's [`CallContext`]
//! bounds everything, including the sleeps.

use crate::context::CallContext;
use crate::errors::AuthnError;
use crate::observability::metrics;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

type RetryPredicate = Arc<dyn Fn(&AuthnError) -> bool + Send + Sync>;

/// Fixed-delay retry policy.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    max_elapsed: Option<Duration>,
    delay: Duration,
    retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("max_elapsed", &self.max_elapsed)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    /// Retry transient errors every 3 seconds until the caller gives up.
    fn default() -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
            delay: DEFAULT_RETRY_DELAY,
            retryable: Arc::new(AuthnError::is_transient),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Stop after `attempts` attempts (at least one is always made).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Stop retrying once `elapsed` has passed since the first attempt.
    #[must_use]
    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = Some(elapsed);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the retryable-error predicate.
    #[must_use]
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AuthnError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    #[must_use]
    pub fn is_retryable(&self, err: &AuthnError) -> bool {
        (self.retryable)(err)
    }

    /// Run `attempt` until it succeeds, fails terminally, the policy is
    /// exhausted or `ctx` stops it.
    ///
    /// `attempt` receives the 1-based attempt number. Each attempt and each
    /// sleep runs under `ctx`.
    ///
    /// # Errors
    ///
    /// The last attempt's error, or `Cancelled` / `DeadlineExceeded`.
    pub async fn run<F, Fut, T>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, AuthnError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AuthnError>>,
    {
        let started = Instant::now();
        let mut attempt_number: u32 = 0;

        loop {
            attempt_number = attempt_number.saturating_add(1);

            let err = match ctx.run(attempt(attempt_number)).await? {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                return Err(err);
            }

            if self
                .max_attempts
                .is_some_and(|max| attempt_number >= max)
            {
                tracing::warn!(
                    target: "authn.transport",
                    operation,
                    attempts = attempt_number,
                    error = %err,
                    "Giving up after maximum attempts"
                );
                return Err(err);
            }

            if self
                .max_elapsed
                .is_some_and(|max| started.elapsed() + self.delay > max)
            {
                tracing::warn!(
                    target: "authn.transport",
                    operation,
                    attempts = attempt_number,
                    error = %err,
                    "Giving up after maximum retry duration"
                );
                return Err(err);
            }

            metrics::record_transport_retry(operation);
            tracing::warn!(
                target: "authn.transport",
                operation,
                attempt = attempt_number,
                delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Authority unreachable, will retry"
            );

            ctx.sleep(self.delay).await?;
        }
    }
}

// =============================================================================
// Error classification
// =============================================================================

/// Map a `reqwest` error to the client taxonomy.
///
/// TLS failures (bad or untrusted certificate, hostname mismatch, handshake
/// alerts) become `Tls` and are never retried. Timeouts and connection
/// failures become `Transport`. Body decoding failures become `Protocol`.
#[must_use]
pub fn classify_reqwest_error(err: &reqwest::Error) -> AuthnError {
    let message = error_chain_message(err);

    if is_tls_error(err) {
        return AuthnError::Tls(message);
    }

    if err.is_decode() || err.is_body() {
        return AuthnError::Protocol(message);
    }

    if err.is_builder() {
        return AuthnError::Configuration(message);
    }

    AuthnError::Transport(message)
}

fn is_tls_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(current) = source {
        if current.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }

        // io::Error::source() skips the wrapped error, so look inside.
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            if io
                .get_ref()
                .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some())
            {
                return true;
            }
        }

        source = current.source();
    }

    let lowered = error_chain_message(err).to_lowercase();
    lowered.contains("certificate") || lowered.contains("unknownissuer")
}

/// Render an error and all of its sources on one line.
fn error_chain_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(current) = source {
        let text = current.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = current.source();
    }
    message
}
