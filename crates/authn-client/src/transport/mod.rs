//! Transport to the authentication authority.

mod client;
mod decorate;
mod request;
mod retry;
mod tls;
mod verifier;

pub use client::AuthorityClient;
pub use decorate::{
    RequestDecorator, TraceContextDecorator, TrackingTypeDecorator, TRACEPARENT_HEADER,
    TRACKING_TYPE_HEADER,
};
pub use request::{format_validity, IssueOptions, IssueOutcome, IssueRequest};
pub use retry::{classify_reqwest_error, RetryPolicy, DEFAULT_RETRY_DELAY};
pub use tls::{ClientCredentials, TlsMaterial};
pub use verifier::{CodecVerifier, TokenVerifier};
