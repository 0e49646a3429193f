//! Background token renewal.
//!
//! A [`TokenRenewer`] checks on a fixed tick whether half the validity of the
//! last issued token has elapsed and, if so, issues a new one and publishes
//! it on an mpsc channel. A failed attempt is logged and retried on the next
//! tick; the tick interval is the only backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! let renewer = x509_renewer(client, Duration::from_secs(3600));
//! let token = renewer.issue(&ctx).await?;
//! let (task, mut tokens) = renewer.spawn(ctx.child());
//! while let Some(token) = tokens.recv().await {
//!     // swap the credential in
//! }
//! ```

use crate::context::CallContext;
use crate::errors::AuthnError;
use crate::observability::metrics;
use crate::transport::{AuthorityClient, IssueOptions};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace};

// =============================================================================
// Constants
// =============================================================================

/// Default interval between renewal checks.
pub const DEFAULT_RENEWAL_TICK: Duration = Duration::from_secs(60);

/// Default bound on a single issuance attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

const MIN_TICK: Duration = Duration::from_millis(1);

// =============================================================================
// Issuer
// =============================================================================

/// Something able to issue a token of a requested validity.
///
/// Implemented for any `Fn(CallContext, Duration) -> impl Future<Output =
/// Result<String, AuthnError>>`.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// # Errors
    ///
    /// Implementation specific.
    async fn issue(&self, ctx: &CallContext, validity: Duration) -> Result<String, AuthnError>;
}

#[async_trait]
impl<F, Fut> TokenIssuer for F
where
    F: Fn(CallContext, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, AuthnError>> + Send + 'static,
{
    async fn issue(&self, ctx: &CallContext, validity: Duration) -> Result<String, AuthnError> {
        (self)(ctx.clone(), validity).await
    }
}

/// Issues through the certificate realm of an [`AuthorityClient`].
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    client: AuthorityClient,
    options: IssueOptions,
}

impl CertificateIssuer {
    pub fn new(client: AuthorityClient) -> Self {
        Self {
            client,
            options: IssueOptions::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: IssueOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl TokenIssuer for CertificateIssuer {
    async fn issue(&self, ctx: &CallContext, validity: Duration) -> Result<String, AuthnError> {
        self.client
            .issue_from_certificate(ctx, validity, self.options.clone())
            .await
    }
}

// =============================================================================
// Renewer
// =============================================================================

/// Periodically re-issues a token before it expires.
#[derive(Clone)]
pub struct TokenRenewer {
    issuer: Arc<dyn TokenIssuer>,
    validity: Duration,
    tick: Duration,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for TokenRenewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRenewer")
            .field("validity", &self.validity)
            .field("tick", &self.tick)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

/// A renewer issuing certificate-realm tokens of `validity` through `client`.
pub fn x509_renewer(client: AuthorityClient, validity: Duration) -> TokenRenewer {
    TokenRenewer::new(CertificateIssuer::new(client), validity)
}

impl TokenRenewer {
    pub fn new(issuer: impl TokenIssuer + 'static, validity: Duration) -> Self {
        Self {
            issuer: Arc::new(issuer),
            validity,
            tick: DEFAULT_RENEWAL_TICK,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Interval between renewal checks.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(MIN_TICK);
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issue one token now.
    ///
    /// # Errors
    ///
    /// The issuer's error, or `Cancelled` / `DeadlineExceeded` from `ctx`.
    pub async fn issue(&self, ctx: &CallContext) -> Result<String, AuthnError> {
        self.issuer.issue(ctx, self.validity).await
    }

    /// Run the loop on a new task publishing on a fresh channel.
    ///
    /// The loop stops when `ctx` is cancelled or the receiver is dropped.
    pub fn spawn(self, ctx: CallContext) -> (JoinHandle<()>, mpsc::Receiver<String>) {
        let (tokens, receiver) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(ctx, tokens));
        (handle, receiver)
    }

    /// Run the loop until `ctx` is cancelled or `tokens` is closed.
    ///
    /// The first renewal is due half a validity after the loop starts; the
    /// caller is expected to hold a fresh token already (see
    /// [`TokenRenewer::issue`]). Nothing is published once `ctx` is
    /// cancelled, including the result of an attempt already in flight.
    #[instrument(skip_all, fields(validity_secs = self.validity.as_secs()))]
    pub async fn run(self, ctx: CallContext, tokens: mpsc::Sender<String>) {
        let half = self.validity / 2;
        let mut next_renewal = Instant::now() + half;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = ctx.cancellation_token().cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            if now < next_renewal {
                trace!(target: "authn.renewal", "Renewal not due");
                continue;
            }

            let attempt = ctx.child().with_timeout(self.attempt_timeout);
            let result = attempt
                .run(self.issuer.issue(&attempt, self.validity))
                .await
                .and_then(|issued| issued);

            if ctx.is_cancelled() {
                debug!(target: "authn.renewal", "Cancelled during renewal, discarding result");
                break;
            }

            match result {
                Ok(token) => {
                    let sent = tokio::select! {
                        biased;
                        () = ctx.cancellation_token().cancelled() => break,
                        sent = tokens.send(token) => sent,
                    };
                    if sent.is_err() {
                        debug!(target: "authn.renewal", "Receiver dropped, stopping renewal");
                        break;
                    }

                    next_renewal = now + half;
                    metrics::record_token_renewal("success");
                    info!(target: "authn.renewal", "Token renewed");
                }
                Err(e) => {
                    metrics::record_token_renewal(failure_label(&e));
                    error!(
                        target: "authn.renewal",
                        error = %e,
                        retry_in_secs = self.tick.as_secs(),
                        "Unable to renew token"
                    );
                }
            }
        }

        debug!(target: "authn.renewal", "Renewal loop stopped");
    }
}

fn failure_label(err: &AuthnError) -> &'static str {
    match err {
        AuthnError::DeadlineExceeded => "timeout",
        _ => "error",
    }
}
