//! Wiremock stand-in for the Hytale provider
//!
//! One [`MockServer`] plays all three provider hosts (OAuth, account data and
//! sessions). Point the client at it with a base URL override.
//!
//! Wiremock answers with the first mounted mock that still matches, so
//! scripted sequences are built by mounting a limited mock
//! (`up_to_n_times`) before the one that should answer afterwards.

use crate::keys::TestKeypair;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DEVICE_AUTH_PATH: &str = "/oauth2/device/auth";
pub const TOKEN_PATH: &str = "/oauth2/token";
pub const PROFILES_PATH: &str = "/my-account/get-profiles";
pub const SESSION_NEW_PATH: &str = "/game-session/new";
pub const SESSION_REFRESH_PATH: &str = "/game-session/refresh";
pub const SESSION_PATH: &str = "/game-session";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A mock provider serving every Hytale endpoint from one address.
pub struct MockHytaleProvider {
    server: MockServer,
}

impl MockHytaleProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to use as the provider override.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Number of requests received on `request_path`.
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }

    // ------------------------------------------------------------------------
    // OAuth
    // ------------------------------------------------------------------------

    pub async fn mount_device_code(&self, device_code: &str, user_code: &str, interval: u64) {
        Mock::given(method("POST"))
            .and(path(DEVICE_AUTH_PATH))
            .and(body_string_contains("client_id="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "device_code": device_code,
                "user_code": user_code,
                "verification_uri": "https://accounts.hytale.com/device",
                "verification_uri_complete":
                    format!("https://accounts.hytale.com/device?user_code={}", user_code),
                "expires_in": 900,
                "interval": interval
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer the next `times` device-code polls with `authorization_pending`.
    pub async fn mount_token_pending(&self, times: u64) {
        self.mount_device_token_error("authorization_pending", Some(times))
            .await;
    }

    pub async fn mount_token_slow_down(&self, times: u64) {
        self.mount_device_token_error("slow_down", Some(times)).await;
    }

    /// Terminal device-flow error such as `expired_token` or `access_denied`.
    pub async fn mount_token_failure(&self, error: &str) {
        self.mount_device_token_error(error, None).await;
    }

    async fn mount_device_token_error(&self, error: &str, times: Option<u64>) {
        let mock = Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("device_code="))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": error,
                "error_description": format!("device flow: {}", error)
            })));
        match times {
            Some(n) => mock.up_to_n_times(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Device-code exchange succeeds with the given token pair.
    pub async fn mount_token_success(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
    ) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("device_code="))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_grant_json(access_token, refresh_token, expires_in)),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh_success(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
    ) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_grant_json(access_token, refresh_token, expires_in)),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh_error(&self, status: u16, error: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({"error": error})))
            .mount(&self.server)
            .await;
    }

    // ------------------------------------------------------------------------
    // Account data
    // ------------------------------------------------------------------------

    /// Profiles visible to `access_token`, owned by `owner`.
    pub async fn mount_profiles(&self, access_token: &str, owner: &str, profiles: &[(Uuid, &str)]) {
        let profiles: Vec<Value> = profiles
            .iter()
            .map(|(uuid, username)| json!({"uuid": uuid, "username": username}))
            .collect();

        Mock::given(method("GET"))
            .and(path(PROFILES_PATH))
            .and(header("Authorization", format!("Bearer {}", access_token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "owner": owner,
                "profiles": profiles
            })))
            .mount(&self.server)
            .await;
    }

    // ------------------------------------------------------------------------
    // Game sessions
    // ------------------------------------------------------------------------

    pub async fn mount_session_new(&self, session_token: &str, identity_token: &str) {
        Mock::given(method("POST"))
            .and(path(SESSION_NEW_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_grant_json(
                session_token,
                identity_token,
                Utc::now() + Duration::hours(1),
            )))
            .mount(&self.server)
            .await;
    }

    /// Session creation fails with `status` and a plain-text `body`.
    pub async fn mount_session_new_error(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(SESSION_NEW_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Refresh of `current_session_token` yields a new session token.
    pub async fn mount_session_refresh(&self, current_session_token: &str, new_session_token: &str) {
        Mock::given(method("POST"))
            .and(path(SESSION_REFRESH_PATH))
            .and(header(
                "Authorization",
                format!("Bearer {}", current_session_token).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_grant_json(
                new_session_token,
                "refreshed-identity-token",
                Utc::now() + Duration::hours(2),
            )))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_session_delete(&self, status: u16) {
        Mock::given(method("DELETE"))
            .and(path(SESSION_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    // ------------------------------------------------------------------------
    // JWKS
    // ------------------------------------------------------------------------

    pub async fn mount_jwks(&self, keys: &[&TestKeypair]) {
        let keys: Vec<Value> = keys.iter().map(|k| k.jwk_json()).collect();
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for the next `times` fetches only.
    pub async fn mount_jwks_limited(&self, keys: &[&TestKeypair], times: u64) {
        let keys: Vec<Value> = keys.iter().map(|k| k.jwk_json()).collect();
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted mock.
    pub async fn reset(&self) {
        self.server.reset().await;
    }
}

pub fn token_grant_json(access_token: &str, refresh_token: Option<&str>, expires_in: i64) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "openid offline auth:server"
    });
    if let (Some(refresh_token), Some(object)) = (refresh_token, body.as_object_mut()) {
        object.insert("refresh_token".to_string(), json!(refresh_token));
    }
    body
}

pub fn session_grant_json(
    session_token: &str,
    identity_token: &str,
    expires_at: DateTime<Utc>,
) -> Value {
    json!({
        "sessionToken": session_token,
        "identityToken": identity_token,
        "expiresAt": expires_at.to_rfc3339()
    })
}
