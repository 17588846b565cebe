//! Verification of provider-issued session and identity tokens.
//!
//! Tokens are compact JWS values signed with Ed25519. The checks run in a fixed
//! order and stop at the first failure:
//!
//! 1. Size limit and structure (three base64url segments)
//! 2. `alg` must be `EdDSA`
//! 3. `kid` must be present and resolve through the JWKS cache
//! 4. Signature over the exact `header.payload` bytes received
//! 5. Payload must be a JSON object
//! 6. `exp` mandatory and in the future
//! 7. `iat`, if present, within the clock skew
//! 8. `sub` mandatory and non-empty
//! 9. Expected audience, if any, present in `aud`
//!
//! The expected audience is the caller's, falling back to the validator's
//! configured default.
//!
//! Each failure is a distinct [`TokenRejection`] for logs and metrics; the
//! Display text is the same generic message for all of them.

use crate::auth::claims::{IdentityClaims, TokenClaims};
use crate::auth::jwks::{JwksCache, JwksError};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::jwt::{split_compact, validate_iat_at, JwtValidationError, EDDSA_ALGORITHM};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Reason a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("The token is invalid or expired")]
    TooLarge,

    #[error("The token is invalid or expired")]
    Malformed,

    #[error("The token is invalid or expired")]
    UnsupportedAlgorithm,

    #[error("The token is invalid or expired")]
    MissingKeyId,

    #[error("The token is invalid or expired")]
    UnknownKey,

    /// The key set could not be fetched; verification fails closed.
    #[error("The token is invalid or expired")]
    KeysUnavailable,

    #[error("The token is invalid or expired")]
    BadSignature,

    #[error("The token is invalid or expired")]
    InvalidPayload,

    #[error("The token is invalid or expired")]
    MissingExpiry,

    #[error("The token is invalid or expired")]
    Expired,

    #[error("The token is invalid or expired")]
    IssuedInFuture,

    #[error("The token is invalid or expired")]
    MissingSubject,

    #[error("The token is invalid or expired")]
    AudienceMismatch,
}

impl TokenRejection {
    /// Stable label for logs and metrics.
    pub fn reason(self) -> &'static str {
        match self {
            TokenRejection::TooLarge => "too_large",
            TokenRejection::Malformed => "malformed",
            TokenRejection::UnsupportedAlgorithm => "unsupported_algorithm",
            TokenRejection::MissingKeyId => "missing_kid",
            TokenRejection::UnknownKey => "unknown_key",
            TokenRejection::KeysUnavailable => "keys_unavailable",
            TokenRejection::BadSignature => "bad_signature",
            TokenRejection::InvalidPayload => "invalid_payload",
            TokenRejection::MissingExpiry => "missing_exp",
            TokenRejection::Expired => "expired",
            TokenRejection::IssuedInFuture => "iat_in_future",
            TokenRejection::MissingSubject => "missing_sub",
            TokenRejection::AudienceMismatch => "audience_mismatch",
        }
    }
}

impl From<JwtValidationError> for TokenRejection {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge => TokenRejection::TooLarge,
            JwtValidationError::MalformedToken => TokenRejection::Malformed,
            JwtValidationError::MissingKid => TokenRejection::MissingKeyId,
            JwtValidationError::IatTooFarInFuture => TokenRejection::IssuedInFuture,
        }
    }
}

/// Verifies provider tokens against keys from the JWKS cache.
pub struct TokenValidator {
    jwks: Arc<JwksCache>,
    clock_skew: Duration,
    default_audience: Option<String>,
}

impl TokenValidator {
    pub fn new(jwks: Arc<JwksCache>, clock_skew: Duration) -> Self {
        Self {
            jwks,
            clock_skew,
            default_audience: None,
        }
    }

    /// Audience enforced when a caller passes `None`.
    pub fn with_default_audience(mut self, audience: Option<String>) -> Self {
        self.default_audience = audience;
        self
    }

    pub fn default_audience(&self) -> Option<&str> {
        self.default_audience.as_deref()
    }

    /// Verify a session token.
    pub async fn validate_session_token(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> Result<TokenClaims, TokenRejection> {
        self.validate_profile(token, expected_audience, "session")
            .await
    }

    /// Verify an identity token and extract its email claims.
    pub async fn validate_identity_token(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> Result<IdentityClaims, TokenRejection> {
        self.validate_profile(token, expected_audience, "identity")
            .await
            .map(IdentityClaims::from)
    }

    async fn validate_profile(
        &self,
        token: &str,
        expected_audience: Option<&str>,
        profile: &'static str,
    ) -> Result<TokenClaims, TokenRejection> {
        let result = self.validate(token, expected_audience).await;
        match &result {
            Ok(_) => metrics::record_token_validation(profile, "success"),
            Err(rejection) => metrics::record_token_validation(profile, rejection.reason()),
        }
        result
    }

    /// Run every check against the current time.
    pub async fn validate(
        &self,
        token: &str,
        expected_audience: Option<&str>,
    ) -> Result<TokenClaims, TokenRejection> {
        self.validate_at(token, expected_audience, Utc::now()).await
    }

    /// Run every check against an explicit `now`.
    #[instrument(skip_all)]
    pub async fn validate_at(
        &self,
        token: &str,
        expected_audience: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenRejection> {
        let expected_audience = expected_audience.or(self.default_audience.as_deref());
        let result = self.check(token, expected_audience, now).await;
        if let Err(rejection) = &result {
            tracing::debug!(
                target: "hytale_auth.jwt",
                reason = rejection.reason(),
                "Token rejected"
            );
        }
        result
    }

    async fn check(
        &self,
        token: &str,
        expected_audience: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenRejection> {
        let jwt = split_compact(token)?;

        if jwt.header.alg != EDDSA_ALGORITHM {
            tracing::debug!(target: "hytale_auth.jwt", alg = %jwt.header.alg, "Unsupported token algorithm");
            return Err(TokenRejection::UnsupportedAlgorithm);
        }

        let kid = jwt.kid()?;

        let key = self.jwks.get_key(kid).await.map_err(|e| match e {
            JwksError::KeyNotFound(_) => TokenRejection::UnknownKey,
            JwksError::Fetch(_) | JwksError::Status(_) | JwksError::Parse(_) => {
                tracing::warn!(target: "hytale_auth.jwt", error = %e, "Signing keys unavailable");
                TokenRejection::KeysUnavailable
            }
        })?;

        if !key.verify(jwt.signing_input.as_bytes(), &jwt.signature) {
            return Err(TokenRejection::BadSignature);
        }

        let payload: Map<String, Value> =
            serde_json::from_slice(&jwt.payload).map_err(|_| TokenRejection::InvalidPayload)?;

        claims_from_payload(payload, expected_audience, now, self.clock_skew)
    }
}

/// Apply the claim checks to a signature-verified payload.
fn claims_from_payload(
    mut payload: Map<String, Value>,
    expected_audience: Option<&str>,
    now: DateTime<Utc>,
    clock_skew: Duration,
) -> Result<TokenClaims, TokenRejection> {
    let exp = match payload.remove("exp") {
        Some(Value::Number(n)) => n.as_i64().ok_or(TokenRejection::InvalidPayload)?,
        Some(_) => return Err(TokenRejection::InvalidPayload),
        None => return Err(TokenRejection::MissingExpiry),
    };
    if exp <= now.timestamp() {
        return Err(TokenRejection::Expired);
    }
    let expires_at = DateTime::<Utc>::from_timestamp(exp, 0).ok_or(TokenRejection::InvalidPayload)?;

    let issued_at = match payload.remove("iat") {
        Some(Value::Number(n)) => {
            let iat = n.as_i64().ok_or(TokenRejection::InvalidPayload)?;
            validate_iat_at(iat, clock_skew, now.timestamp())?;
            DateTime::<Utc>::from_timestamp(iat, 0)
        }
        Some(_) => return Err(TokenRejection::InvalidPayload),
        None => None,
    };

    let subject = match payload.remove("sub") {
        Some(Value::String(sub)) if !sub.is_empty() => sub,
        _ => return Err(TokenRejection::MissingSubject),
    };

    let audience = match payload.remove("aud") {
        Some(Value::String(aud)) => vec![aud],
        Some(Value::Array(values)) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(_) => return Err(TokenRejection::InvalidPayload),
        None => Vec::new(),
    };

    if let Some(expected) = expected_audience {
        if !audience.iter().any(|a| a == expected) {
            return Err(TokenRejection::AudienceMismatch);
        }
    }

    let issuer = match payload.remove("iss") {
        Some(Value::String(iss)) => Some(iss),
        _ => None,
    };
    let token_id = match payload.remove("jti") {
        Some(Value::String(jti)) => Some(jti),
        _ => None,
    };

    Ok(TokenClaims {
        subject,
        issuer,
        audience,
        expires_at,
        issued_at,
        token_id,
        extra: payload,
    })
}
