//! Metrics emitted by the client.
//!
//! Recorded through the `metrics` facade; installing an exporter is up to
//! the host service. All metrics use the `authn_` prefix, `_total` for
//! counters and `_seconds` for duration histograms.
//!
//! # Cardinality
//!
//! - `result`: hit, miss, coalesced
//! - `status`: success, error, rejected, timeout
//! - `operation`: bounded by code (issue, verify, metadata, ...)
//!
//! Tokens and principals never appear in labels.

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Cache
// ============================================================================

/// Outcome of a coalescer lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    /// Served from the cache.
    Hit,
    /// This caller became the leader and performed the fetch.
    Miss,
    /// This caller waited on another caller's in-flight fetch.
    Coalesced,
}

impl CacheResult {
    fn as_label(self) -> &'static str {
        match self {
            CacheResult::Hit => "hit",
            CacheResult::Miss => "miss",
            CacheResult::Coalesced => "coalesced",
        }
    }
}

/// Metric: `authn_cache_lookups_total`
/// Labels: `result`
pub fn record_cache_lookup(result: CacheResult) {
    counter!("authn_cache_lookups_total", "result" => result.as_label()).increment(1);
}

// ============================================================================
// Verification
// ============================================================================

/// Metric: `authn_verifications_total`
/// Labels: `status` (success, error)
pub fn record_verification(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("authn_verifications_total", "status" => status).increment(1);
}

// ============================================================================
// Transport
// ============================================================================

/// Metric: `authn_transport_retries_total`
/// Labels: `operation`
pub fn record_transport_retry(operation: &'static str) {
    counter!("authn_transport_retries_total", "operation" => operation).increment(1);
}

/// Record the duration of one authority round trip.
///
/// Metric: `authn_authority_request_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_authority_request(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("authn_authority_request_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

// ============================================================================
// Renewal
// ============================================================================

/// Metric: `authn_token_renewals_total`
/// Labels: `status` (success, error, timeout)
pub fn record_token_renewal(status: &'static str) {
    counter!("authn_token_renewals_total", "status" => status).increment(1);
}
