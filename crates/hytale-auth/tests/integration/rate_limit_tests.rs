//! Rate-limit middleware end to end.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use common::types::AccountId;
use hytale_auth::config::RateLimitSettings;
use hytale_auth::middleware::enforce_rate_limit;
use hytale_auth::rate_limit::{EndpointRateLimiters, IdentifierStrategy, RateLimitConfig, RateLimiter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/game-session", post(|| async { "created" }))
        .layer(axum::middleware::from_fn_with_state(limiter, enforce_rate_limit))
}

fn request(ip: [u8; 4], account: Option<&str>) -> Request {
    let mut req = axum::http::Request::builder()
        .method("POST")
        .uri("/game-session")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((ip, 50000))));
    if let Some(account) = account {
        req.extensions_mut().insert(AccountId::new(account));
    }
    req
}

fn remaining(response: &axum::response::Response) -> u32 {
    response
        .headers()
        .get("X-RateLimit-Remaining")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

/// 5 per 100 ms: remaining 4..0, sixth rejected, admitted again after 150 ms.
#[tokio::test]
async fn test_window_exhaustion_and_recovery() {
    let limiter = Arc::new(RateLimiter::new(
        "sessions",
        RateLimitConfig::new(5, Duration::from_millis(100), IdentifierStrategy::ClientAddress),
    ));
    let app = app(limiter);

    let mut seen = Vec::new();
    for _ in 0..5 {
        let response = app.clone().oneshot(request([10, 0, 0, 1], None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        seen.push(remaining(&response));
    }
    assert_eq!(seen, vec![4, 3, 2, 1, 0]);

    let rejected = app.clone().oneshot(request([10, 0, 0, 1], None)).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers().get("Retry-After").unwrap(), "1");
    assert_eq!(remaining(&rejected), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let recovered = app.oneshot(request([10, 0, 0, 1], None)).await.unwrap();
    assert_eq!(recovered.status(), StatusCode::OK);
    assert_eq!(remaining(&recovered), 4);
}

#[tokio::test]
async fn test_accounts_are_limited_independently_of_address() {
    let limiters = EndpointRateLimiters::from_settings(&RateLimitSettings {
        sessions: RateLimitConfig::new(1, Duration::from_secs(60), IdentifierStrategy::AccountId),
        ..RateLimitSettings::default()
    });
    let app = app(Arc::clone(&limiters.sessions));

    // Same address, two accounts
    let alice = app.clone().oneshot(request([10, 0, 0, 1], Some("alice"))).await.unwrap();
    let bob = app.clone().oneshot(request([10, 0, 0, 1], Some("bob"))).await.unwrap();
    let alice_again = app.oneshot(request([10, 0, 0, 2], Some("alice"))).await.unwrap();

    assert_eq!(alice.status(), StatusCode::OK);
    assert_eq!(bob.status(), StatusCode::OK);
    assert_eq!(alice_again.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limiters.sessions.bucket_count(), 2);
}

#[tokio::test]
async fn test_device_code_issuance_is_tightest_by_default() {
    let limiters = EndpointRateLimiters::from_settings(&RateLimitSettings::default());
    let app = app(Arc::clone(&limiters.device_code));

    for _ in 0..5 {
        let response = app.clone().oneshot(request([192, 168, 1, 9], None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let rejected = app.oneshot(request([192, 168, 1, 9], None)).await.unwrap();

    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers().get("Retry-After").unwrap(), "900");
}
