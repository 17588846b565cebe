//! JWKS cache for the provider's Ed25519 signing keys.
//!
//! Keys are fetched from the provider's `/.well-known/jwks.json` endpoint and
//! held behind a `tokio::sync::RwLock`. A lookup is served from the cache when
//! the key set is younger than the refresh interval and contains the requested
//! `kid`; otherwise the set is re-fetched synchronously and the lookup retried
//! once.
//!
//! # Security
//!
//! - Only `OKP` / `Ed25519` / `EdDSA` keys with a 32-byte `x` are accepted
//! - A refresh replaces the whole key set, so revoked keys disappear
//! - Fetch failures propagate; callers fail closed

use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::jwt::{decode_ed25519_public_key_jwk, EDDSA_ALGORITHM, ED25519_PUBLIC_KEY_LEN};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

/// Default key set lifetime (1 hour).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// Timeout for a single JWKS fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),

    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    #[error("JWKS response could not be parsed: {0}")]
    Parse(String),

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),
}

/// A provider signing key, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub kid: String,
    pub curve: String,
    pub algorithm: String,
    pub public_key: [u8; ED25519_PUBLIC_KEY_LEN],
    pub expires_at: Option<DateTime<Utc>>,
}

impl SigningKey {
    /// True once the key's own `exp` has passed. Keys without `exp` never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Verify an Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        UnparsedPublicKey::new(&ED25519, &self.public_key)
            .verify(message, signature)
            .is_ok()
    }
}

/// Wire shape of one JWKS entry. Everything optional so a bad entry can be
/// reported and skipped rather than failing the whole document.
#[derive(Debug, Deserialize)]
struct JwkEntry {
    #[serde(default)]
    kty: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Value>,
}

struct CachedKeys {
    keys: HashMap<String, SigningKey>,
    fetched_at: Instant,
}

/// Cache of the provider's signing keys.
pub struct JwksCache {
    jwks_url: String,
    http_client: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
    refresh_interval: Duration,
}

impl JwksCache {
    pub fn new(jwks_url: String) -> Self {
        Self::with_refresh_interval(jwks_url, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(jwks_url: String, refresh_interval: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "hytale_auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: RwLock::new(None),
            refresh_interval,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Look up a signing key by id, refreshing the set when it is stale, the
    /// id is unknown, or the cached key has passed its `exp`.
    ///
    /// # Errors
    ///
    /// - `Fetch` / `Status` / `Parse` if a needed refresh fails
    /// - `KeyNotFound` if no unexpired key has the id even after a refresh
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<SigningKey, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.refresh_interval {
                    match cached.keys.get(kid) {
                        Some(key) if !key.is_expired(Utc::now()) => {
                            tracing::debug!(target: "hytale_auth.jwks", kid = %kid, "JWKS cache hit");
                            return Ok(key.clone());
                        }
                        Some(_) => {
                            tracing::debug!(target: "hytale_auth.jwks", kid = %kid, "Cached key expired, refreshing");
                        }
                        None => {
                            tracing::debug!(target: "hytale_auth.jwks", kid = %kid, "Key not in cached set, refreshing");
                        }
                    }
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        if let Some(key) = cache
            .as_ref()
            .and_then(|c| c.keys.get(kid))
            .filter(|key| !key.is_expired(Utc::now()))
        {
            return Ok(key.clone());
        }

        tracing::warn!(target: "hytale_auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
        Err(JwksError::KeyNotFound(kid.to_string()))
    }

    /// Re-fetch the key set regardless of its age.
    pub async fn force_refresh(&self) -> Result<usize, JwksError> {
        self.refresh().await?;
        Ok(self.key_count().await)
    }

    /// Number of keys currently cached (0 before the first fetch).
    pub async fn key_count(&self) -> usize {
        self.cache
            .read()
            .await
            .as_ref()
            .map_or(0, |cached| cached.keys.len())
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<(), JwksError> {
        tracing::debug!(target: "hytale_auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let result = self.fetch().await;
        metrics::record_jwks_refresh(if result.is_ok() { "success" } else { "error" });
        let keys = result?;

        let count = keys.len();
        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        tracing::info!(target: "hytale_auth.jwks", key_count = count, "JWKS cache refreshed");
        Ok(())
    }

    async fn fetch(&self) -> Result<HashMap<String, SigningKey>, JwksError> {
        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "hytale_auth.jwks", error = %e, "Failed to fetch JWKS");
                JwksError::Fetch(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "hytale_auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(JwksError::Status(response.status().as_u16()));
        }

        let document: JwksDocument = response.json().await.map_err(|e| {
            tracing::error!(target: "hytale_auth.jwks", error = %e, "Failed to parse JWKS response");
            JwksError::Parse(e.to_string())
        })?;

        Ok(build_key_map(document.keys, Utc::now()))
    }
}

/// Build the kid -> key map, skipping entries that are not usable Ed25519 keys.
fn build_key_map(entries: Vec<Value>, now: DateTime<Utc>) -> HashMap<String, SigningKey> {
    let mut keys = HashMap::new();
    for entry in entries {
        match parse_key(entry, now) {
            Ok(key) => {
                keys.insert(key.kid.clone(), key);
            }
            Err(reason) => {
                tracing::warn!(target: "hytale_auth.jwks", reason = %reason, "Skipping JWKS entry");
            }
        }
    }
    keys
}

fn parse_key(entry: Value, now: DateTime<Utc>) -> Result<SigningKey, String> {
    let jwk: JwkEntry = serde_json::from_value(entry).map_err(|e| e.to_string())?;

    let kid = jwk
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| "missing kid".to_string())?;

    if jwk.kty.as_deref() != Some("OKP") {
        return Err(format!("kid {}: unsupported kty {:?}", kid, jwk.kty));
    }
    let curve = jwk.crv.unwrap_or_default();
    if curve != "Ed25519" {
        return Err(format!("kid {}: unsupported crv {:?}", kid, curve));
    }
    let algorithm = jwk.alg.unwrap_or_default();
    if algorithm != EDDSA_ALGORITHM {
        return Err(format!("kid {}: unsupported alg {:?}", kid, algorithm));
    }

    let x = jwk.x.ok_or_else(|| format!("kid {}: missing x", kid))?;
    let public_key =
        decode_ed25519_public_key_jwk(&x).map_err(|e| format!("kid {}: {}", kid, e))?;

    let expires_at = match jwk.exp {
        Some(exp) => {
            let at = DateTime::<Utc>::from_timestamp(exp, 0)
                .ok_or_else(|| format!("kid {}: exp out of range", kid))?;
            if at <= now {
                return Err(format!("kid {}: expired at {}", kid, at));
            }
            Some(at)
        }
        None => None,
    };

    Ok(SigningKey {
        kid,
        curve,
        algorithm,
        public_key,
        expires_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hytale_auth_test_utils::TestKeypair;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_key_map_skips_invalid_entries() {
        let good = TestKeypair::new(1, "good");
        let now = Utc::now();
        let entries = vec![
            good.jwk_json(),
            json!({"kty": "RSA", "kid": "rsa", "alg": "RS256", "n": "abc", "e": "AQAB"}),
            json!({"kty": "OKP", "crv": "X25519", "kid": "x25519", "alg": "EdDSA", "x": good.public_key_b64url()}),
            json!({"kty": "OKP", "crv": "Ed25519", "kid": "short", "alg": "EdDSA", "x": "AAAA"}),
            json!({"kty": "OKP", "crv": "Ed25519", "alg": "EdDSA", "x": good.public_key_b64url()}),
            json!("not an object"),
        ];

        let keys = build_key_map(entries, now);

        assert_eq!(keys.len(), 1);
        let key = keys.get("good").unwrap();
        assert_eq!(key.curve, "Ed25519");
        assert_eq!(key.algorithm, "EdDSA");
        assert_eq!(key.public_key.as_slice(), good.public_key_bytes());
    }

    #[test]
    fn test_build_key_map_skips_expired_keys() {
        let kp = TestKeypair::new(2, "old");
        let now = Utc::now();
        let mut expired = kp.jwk_json();
        expired
            .as_object_mut()
            .unwrap()
            .insert("exp".to_string(), json!(now.timestamp() - 10));
        let mut future = TestKeypair::new(3, "new").jwk_json();
        future
            .as_object_mut()
            .unwrap()
            .insert("exp".to_string(), json!(now.timestamp() + 3600));

        let keys = build_key_map(vec![expired, future], now);

        assert!(!keys.contains_key("old"));
        assert!(keys.get("new").unwrap().expires_at.is_some());
    }

    #[test]
    fn test_signing_key_verify() {
        let kp = TestKeypair::new(4, "k");
        let keys = build_key_map(vec![kp.jwk_json()], Utc::now());
        let key = keys.get("k").unwrap();

        let signature = kp.sign(b"header.payload");
        assert!(key.verify(b"header.payload", &signature));
        assert!(!key.verify(b"header.payloaX", &signature));
    }

    #[tokio::test]
    async fn test_get_key_fetches_once_then_serves_from_cache() {
        let server = MockServer::start().await;
        let kp = TestKeypair::new(5, "cached");
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [kp.jwk_json()]})))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::new(format!("{}/.well-known/jwks.json", server.uri()));
        assert_eq!(cache.key_count().await, 0);

        cache.get_key("cached").await.unwrap();
        cache.get_key("cached").await.unwrap();

        assert_eq!(cache.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_key_unknown_kid_refreshes_and_fails() {
        let server = MockServer::start().await;
        let kp = TestKeypair::new(6, "known");
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [kp.jwk_json()]})))
            .expect(2)
            .mount(&server)
            .await;

        let cache = JwksCache::new(format!("{}/.well-known/jwks.json", server.uri()));
        cache.get_key("known").await.unwrap();

        let result = cache.get_key("unknown").await;
        assert!(matches!(result, Err(JwksError::KeyNotFound(kid)) if kid == "unknown"));
    }

    #[tokio::test]
    async fn test_get_key_fails_closed_on_endpoint_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = JwksCache::new(format!("{}/.well-known/jwks.json", server.uri()));
        let result = cache.get_key("any").await;

        assert!(matches!(result, Err(JwksError::Status(500))));
    }

    #[tokio::test]
    async fn test_get_key_invalid_json_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let cache = JwksCache::new(format!("{}/.well-known/jwks.json", server.uri()));
        assert!(matches!(
            cache.get_key("any").await,
            Err(JwksError::Parse(_))
        ));
    }

    #[test]
    fn test_signing_key_is_expired() {
        let now = Utc::now();
        let mut key = parse_key(TestKeypair::new(4, "k").jwk_json(), now).unwrap();
        assert!(!key.is_expired(now));

        key.expires_at = Some(now + chrono::Duration::seconds(5));
        assert!(!key.is_expired(now));
        assert!(key.is_expired(now + chrono::Duration::seconds(5)));
    }

    #[tokio::test]
    async fn test_key_expiring_after_fetch_is_not_served() {
        let server = MockServer::start().await;
        let mut jwk = TestKeypair::new(8, "short").jwk_json();
        jwk["exp"] = json!(Utc::now().timestamp() + 2);
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [jwk]})))
            .expect(2)
            .mount(&server)
            .await;

        let cache = JwksCache::new(format!("{}/.well-known/jwks.json", server.uri()));
        assert!(cache.get_key("short").await.is_ok());

        tokio::time::sleep(Duration::from_millis(2100)).await;

        // Set is fresh, but the key itself has expired: refetch, then reject
        assert!(matches!(
            cache.get_key("short").await,
            Err(JwksError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_cache_is_refreshed() {
        let server = MockServer::start().await;
        let kp = TestKeypair::new(7, "k");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [kp.jwk_json()]})))
            .expect(2)
            .mount(&server)
            .await;

        let cache = JwksCache::with_refresh_interval(
            format!("{}/.well-known/jwks.json", server.uri()),
            Duration::from_millis(20),
        );
        cache.get_key("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get_key("k").await.unwrap();
    }
}
