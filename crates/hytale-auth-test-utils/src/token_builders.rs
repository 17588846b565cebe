//! Builder patterns for provider token claims
//!
//! Provides a fluent API for the claims carried in session and identity tokens.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for session or identity token claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new()
///     .for_subject("acct-1")
///     .with_audience("game-server")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    sub: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    iss: String,
    aud: Vec<String>,
    extra: Map<String, Value>,
}

impl TestClaimsBuilder {
    /// Create a builder for a token valid for one hour.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: Some("test-account".to_string()),
            exp: Some((now + Duration::seconds(3600)).timestamp()),
            iat: Some(now.timestamp()),
            iss: "https://sessions.hytale.com".to_string(),
            aud: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = Some(subject.to_string());
        self
    }

    pub fn without_subject(mut self) -> Self {
        self.sub = None;
        self
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    pub fn without_expiry(mut self) -> Self {
        self.exp = None;
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.aud.push(audience.to_string());
        self
    }

    /// Add an identity-token email claim.
    pub fn with_email(self, email: &str, verified: bool) -> Self {
        self.with_claim("email", json!(email))
            .with_claim("email_verified", json!(verified))
    }

    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = self.extra;
        claims.insert("iss".to_string(), json!(self.iss));
        if let Some(sub) = self.sub {
            claims.insert("sub".to_string(), json!(sub));
        }
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        if let Some(iat) = self.iat {
            claims.insert("iat".to_string(), json!(iat));
        }
        if !self.aud.is_empty() {
            claims.insert("aud".to_string(), json!(self.aud));
        }
        Value::Object(claims)
    }
}

impl Default for TestClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
