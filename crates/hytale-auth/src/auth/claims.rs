//! Claims extracted from verified provider tokens.
//!
//! Claims are ephemeral and never persisted. The subject is redacted in Debug
//! output.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// Claims common to session and identity tokens.
#[derive(Clone, PartialEq)]
pub struct TokenClaims {
    /// Provider account or profile identifier - redacted in Debug output.
    pub subject: String,
    pub issuer: Option<String>,
    /// `aud` normalized to a list (it may be a string or an array on the wire).
    pub audience: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    /// `jti`, when present.
    pub token_id: Option<String>,
    /// Every other claim, untouched.
    pub extra: Map<String, Value>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("subject", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .field("token_id", &self.token_id)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

impl TokenClaims {
    pub fn has_audience(&self, audience: &str) -> bool {
        self.audience.iter().any(|a| a == audience)
    }

    /// Look up a claim that is not part of the fixed set.
    pub fn extra_claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// Claims of an identity token: the common set plus the email pair.
#[derive(Clone, PartialEq)]
pub struct IdentityClaims {
    pub claims: TokenClaims,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl fmt::Debug for IdentityClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityClaims")
            .field("claims", &self.claims)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("email_verified", &self.email_verified)
            .finish()
    }
}

impl From<TokenClaims> for IdentityClaims {
    fn from(mut claims: TokenClaims) -> Self {
        let email = match claims.extra.remove("email") {
            Some(Value::String(email)) if !email.is_empty() => Some(email),
            _ => None,
        };
        let email_verified = matches!(
            claims.extra.remove("email_verified"),
            Some(Value::Bool(true))
        );
        Self {
            claims,
            email,
            email_verified,
        }
    }
}
