//! Authentication client library
//!
//! Client side of a token-based trust system: obtains signed tokens from a
//! central authority in exchange for a credential, verifies presented tokens
//! with single-flight caching, and turns claims into a normalized tag list.
//!
//! # Modules
//!
//! - `authenticator` - Cached, coalesced token authentication facade
//! - `claims` - Claim sets, the token codec and normalization
//! - `coalescer` - Keyed single-flight cache
//! - `config` - Client and authenticator configuration
//! - `context` - Cancellation, deadlines and trace propagation
//! - `errors` - Error types
//! - `identity` - Credential sources (certificate, directory, third party, cloud)
//! - `observability` - Metrics
//! - `renewal` - Background token renewal
//! - `transport` - HTTP transport to the authority

#![warn(clippy::pedantic)]

pub mod authenticator;
pub mod claims;
pub mod coalescer;
pub mod config;
pub mod context;
pub mod errors;
pub mod identity;
pub mod observability;
pub mod renewal;
pub mod transport;

pub use authenticator::{AuthPolicy, Authenticator, PolicyDecision, RateLimiter};
pub use claims::{ClaimSet, ClaimsCodec, NormalizedClaims, Realm};
pub use coalescer::RequestCoalescer;
pub use config::{AuthenticatorConfig, ClientConfig, CodecConfig};
pub use context::{CallContext, TraceContext};
pub use errors::{AuthnError, AuthorityError};
pub use renewal::{x509_renewer, TokenIssuer, TokenRenewer};
pub use transport::{AuthorityClient, IssueOptions, TokenVerifier};
