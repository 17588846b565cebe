//! Metrics definitions for the Hytale auth library.
//!
//! All metrics follow Prometheus naming conventions:
//! - `hytale_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `limiter`: 4 values (endpoint classes)
//! - `operation`: bounded by the provider API surface
//! - `outcome`: `success` or a classified error code / rejection reason

use metrics::{counter, histogram};
use std::time::Duration;

/// Record a rate-limit decision.
///
/// Metric: `hytale_auth_rate_limit_decisions_total`
/// Labels: `limiter`, `decision`
pub fn record_rate_limit_decision(limiter: &str, allowed: bool) {
    counter!("hytale_auth_rate_limit_decisions_total",
        "limiter" => limiter.to_string(),
        "decision" => if allowed { "allowed" } else { "rejected" }
    )
    .increment(1);
}

/// Record a JWKS fetch.
///
/// Metric: `hytale_auth_jwks_refresh_total`
/// Labels: `status`
pub fn record_jwks_refresh(status: &str) {
    counter!("hytale_auth_jwks_refresh_total", "status" => status.to_string()).increment(1);
}

/// Record a token validation by profile and outcome.
///
/// Metric: `hytale_auth_token_validations_total`
/// Labels: `profile` (session, identity), `outcome`
pub fn record_token_validation(profile: &str, outcome: &str) {
    counter!("hytale_auth_token_validations_total",
        "profile" => profile.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a provider call.
///
/// Metrics: `hytale_auth_upstream_requests_total`, `hytale_auth_upstream_request_duration_seconds`
/// Labels: `operation`, `outcome`
pub fn record_upstream_call(operation: &str, outcome: &str, duration: Duration) {
    histogram!("hytale_auth_upstream_request_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("hytale_auth_upstream_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a session lifecycle operation.
///
/// Metric: `hytale_auth_session_operations_total`
/// Labels: `operation`, `status`
pub fn record_session_operation(operation: &str, success: bool) {
    counter!("hytale_auth_session_operations_total",
        "operation" => operation.to_string(),
        "status" => if success { "success" } else { "error" }
    )
    .increment(1);
}
