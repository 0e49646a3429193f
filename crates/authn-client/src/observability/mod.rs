//! Observability for the client.
//!
//! Provides metrics definitions. Logging goes through `tracing` with
//! `authn.*` targets directly in each module.

pub mod metrics;
