//! Caller context carried through every suspending operation.
//!
//! A [`CallContext`] bundles the three things a caller hands down to the
//! client: a cancellation signal, an optional deadline and the trace
//! context used to causally link outbound requests. Blocking points (the
//! coalescer wait, the retry sleep, the network call itself) all go through
//! [`CallContext::run`] or [`CallContext::sleep`] so they return promptly
//! once the caller gives up.

use crate::errors::AuthnError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Trace context
// =============================================================================

/// W3C trace context identifiers.
///
/// The trace id is shared by every request made on behalf of one caller; the
/// span id identifies the caller's own span. Outbound requests derive a
/// fresh child span id via [`TraceContext::child_span`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
}

impl TraceContext {
    /// Start a new trace.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
        }
    }

    /// Resume a trace received from an upstream `traceparent` header.
    ///
    /// Returns `None` unless the header is a version-00 value with a 32 hex
    /// digit trace id and 16 hex digit parent id.
    #[must_use]
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let (Some("00"), Some(trace_id), Some(span_id), Some(_flags), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
        if !is_hex(trace_id, 32) || !is_hex(span_id, 16) {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
        })
    }

    /// Same trace, new span id.
    #[must_use]
    pub fn child_span(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Render as a sampled `traceparent` header value.
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

fn new_span_id() -> String {
    // An all-zero span id is invalid in W3C trace context.
    let id = rand::random::<u64>().max(1);
    format!("{id:016x}")
}

// =============================================================================
// Call context
// =============================================================================

/// Cancellation, deadline and trace context for one logical operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    trace: TraceContext,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// A fresh context with no deadline and a new root trace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            trace: TraceContext::new_root(),
        }
    }

    /// Use an existing cancellation token (e.g. a service shutdown token).
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bound the operation by `timeout` from now.
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the operation by an absolute deadline.
    ///
    /// An existing earlier deadline is kept.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    /// Derive a child context.
    ///
    /// Cancelling the parent cancels the child; cancelling the child leaves
    /// the parent untouched. The deadline is inherited and the child gets a
    /// new span in the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            trace: self.trace.child_span(),
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// Why this context is no longer usable, if it is not.
    #[must_use]
    pub fn check(&self) -> Option<AuthnError> {
        if self.cancel.is_cancelled() {
            return Some(AuthnError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(AuthnError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first. The future is dropped in that case.
    ///
    /// # Errors
    ///
    /// `Cancelled` or `DeadlineExceeded`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, AuthnError>
    where
        F: Future<Output = T>,
    {
        if let Some(err) = self.check() {
            return Err(err);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(AuthnError::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(AuthnError::DeadlineExceeded),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(AuthnError::Cancelled),
                out = fut => Ok(out),
            },
        }
    }

    /// Sleep for `duration`, waking early on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// `Cancelled` or `DeadlineExceeded`.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AuthnError> {
        self.run(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_traceparent_format() {
        let trace = TraceContext::new_root();
        let header = trace.traceparent();

        let parts: Vec<&str> = header.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts.first().copied(), Some("00"));
        assert_eq!(parts.get(1).map(|s| s.len()), Some(32));
        assert_eq!(parts.get(2).map(|s| s.len()), Some(16));
        assert_eq!(parts.get(3).copied(), Some("01"));
    }

    #[test]
    fn test_child_span_keeps_trace_id() {
        let parent = TraceContext::new_root();
        let child = parent.child_span();
        assert_eq!(parent.trace_id(), child.trace_id());
        assert_ne!(parent.span_id(), "0000000000000000");
        assert_ne!(child.span_id(), "0000000000000000");
    }

    #[test]
    fn test_from_traceparent() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let trace = TraceContext::from_traceparent(header).unwrap();
        assert_eq!(trace.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(trace.span_id(), "00f067aa0ba902b7");

        assert!(TraceContext::from_traceparent("01-abc-def-01").is_none());
        assert!(TraceContext::from_traceparent("00-short-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::from_traceparent("").is_none());
    }

    #[test]
    fn test_child_context_cancellation_is_one_way() {
        let parent = CallContext::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other_child = parent.child();
        parent.cancel();
        assert!(other_child.is_cancelled());
    }

    #[test]
    fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
        let out = ctx.run(async { 42 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_fails_at_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
        let err = ctx.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, AuthnError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_run_returns_cancelled_promptly() {
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = ctx.run(std::future::pending::<()>()).await.unwrap_err();
        assert!(matches!(err, AuthnError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_on_already_cancelled_context() {
        let ctx = CallContext::new();
        ctx.cancel();
        let err = ctx.run(async { 1 }).await.unwrap_err();
        assert!(matches!(err, AuthnError::Cancelled));
    }
}
