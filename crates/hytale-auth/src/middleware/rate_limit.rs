//! Rate-limit middleware.
//!
//! Applies one [`RateLimiter`] to a route before the handler (and therefore
//! before any provider call) runs. Every response carries the
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
//! headers; a rejection is a 429 with `Retry-After`.
//!
//! Account-keyed limiters read the [`AccountId`] request extension set by the
//! host's authentication layer and fall back to the client address when it is
//! missing.

use crate::errors::AuthError;
use crate::rate_limit::{IdentifierStrategy, RateLimitDecision, RateLimiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::types::AccountId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Identifier used when neither an account nor a peer address is known.
const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Rate-limit middleware. Use with `axum::middleware::from_fn_with_state`.
#[instrument(skip_all, name = "hytale_auth.middleware.rate_limit")]
pub async fn enforce_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let identifier = identifier_for(&limiter, &req);
    let decision = limiter.check(&identifier);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        AuthError::RateLimitExceeded {
            retry_after_secs: decision.retry_after.map_or(0, whole_seconds_ceil),
        }
        .into_response()
    };

    write_headers(response.headers_mut(), &decision);
    response
}

fn identifier_for(limiter: &RateLimiter, req: &Request) -> String {
    if limiter.config().strategy == IdentifierStrategy::AccountId {
        if let Some(account_id) = req.extensions().get::<AccountId>() {
            return format!("account:{}", account_id);
        }
    }

    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => UNKNOWN_IDENTIFIER.to_string(),
    }
}

fn whole_seconds_ceil(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn write_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_at_unix()));
}
