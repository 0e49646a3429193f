//! Common utilities shared across the authn crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact token helpers (size limits, header peeking, bearer extraction)
pub mod jwt;

/// Module for scrubbing token values out of error text
pub mod redact;
