//! Cross-cutting request decoration.
//!
//! Every outbound request passes through the client's decorator chain just
//! before it is sent, once per attempt.

use crate::context::CallContext;
use reqwest::RequestBuilder;

/// Header carrying the W3C trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header carrying the caller-supplied tracking type.
pub const TRACKING_TYPE_HEADER: &str = "X-External-Tracking-Type";

/// Adds headers (or anything else) to an outbound request.
pub trait RequestDecorator: Send + Sync {
    fn decorate(&self, ctx: &CallContext, request: RequestBuilder) -> RequestBuilder;
}

/// Adds a `traceparent` header in the caller's trace with a fresh span id,
/// so each attempt is a distinct child span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextDecorator;

impl RequestDecorator for TraceContextDecorator {
    fn decorate(&self, ctx: &CallContext, request: RequestBuilder) -> RequestBuilder {
        let span = ctx.trace().child_span();
        tracing::trace!(
            target: "authn.transport",
            trace_id = %span.trace_id(),
            span_id = %span.span_id(),
            "Propagating trace context"
        );
        request.header(TRACEPARENT_HEADER, span.traceparent())
    }
}

/// Adds `X-External-Tracking-Type`.
#[derive(Debug, Clone)]
pub struct TrackingTypeDecorator {
    tracking_type: String,
}

impl TrackingTypeDecorator {
    #[must_use]
    pub fn new(tracking_type: impl Into<String>) -> Self {
        Self {
            tracking_type: tracking_type.into(),
        }
    }
}

impl RequestDecorator for TrackingTypeDecorator {
    fn decorate(&self, _ctx: &CallContext, request: RequestBuilder) -> RequestBuilder {
        request.header(TRACKING_TYPE_HEADER, self.tracking_type.as_str())
    }
}
