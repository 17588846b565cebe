//! Compact-JWT parsing utilities for provider-issued tokens.
//!
//! This module covers the parts of token handling that need no key material:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - Splitting a compact token into its three decoded segments
//! - Header parsing (algorithm and key id)
//! - iat validation logic
//! - Ed25519 JWK public key decoding
//!
//! Signature verification and claim policy live in the `hytale-auth` crate,
//! which owns the JWKS cache.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only EdDSA (Ed25519) is recognized; every other `alg` is rejected by callers
//! - Error messages are generic; details are logged at debug level

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Provider session and identity tokens are well under 2KB. Anything larger is
/// rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for the `iat` claim (60 seconds).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Maximum configurable clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// The only signature algorithm accepted in token headers and JWKs.
pub const EDDSA_ALGORITHM: &str = "EdDSA";

/// Length of a raw Ed25519 public key.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while parsing a compact JWT.
///
/// Display strings are intentionally generic; match on the variant for the
/// concrete reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (segment count, base64url, or header JSON).
    #[error("The token is invalid or expired")]
    MalformedToken,

    /// Token is missing a usable `kid` header.
    #[error("The token is invalid or expired")]
    MissingKid,

    /// Token `iat` claim is too far in the future.
    #[error("The token is invalid or expired")]
    IatTooFarInFuture,
}

/// Errors decoding an Ed25519 public key from a JWK `x` member.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyDecodeError {
    #[error("public key is not valid base64url")]
    InvalidEncoding,

    #[error("public key must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

// =============================================================================
// Token Types
// =============================================================================

/// JOSE header fields the validator cares about.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JwtHeader {
    /// Signature algorithm; anything other than `EdDSA` is refused.
    pub alg: String,

    /// Key id used to look up the signing key in the JWKS.
    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default)]
    pub typ: Option<String>,
}

/// A compact JWT split into its decoded parts.
///
/// `signing_input` borrows the exact `header.payload` bytes from the original
/// token so the signature is verified over what was received, not over a
/// re-encoding.
#[derive(Debug, Clone)]
pub struct CompactJwt<'a> {
    pub header: JwtHeader,
    pub signing_input: &'a str,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl CompactJwt<'_> {
    /// The non-empty key id from the header.
    ///
    /// # Errors
    ///
    /// Returns `JwtValidationError::MissingKid` if the header has no `kid` or it is empty.
    pub fn kid(&self) -> Result<&str, JwtValidationError> {
        self.header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(JwtValidationError::MissingKid)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWT into decoded header, payload and signature.
///
/// This does NOT verify anything beyond structure. The caller must still check
/// the algorithm, fetch the key by `kid` and verify the signature over
/// `signing_input`.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not exactly three segments, a segment is not base64url,
///   or the header is not a JSON object with a string `alg`
pub fn split_compact(token: &str) -> Result<CompactJwt<'_>, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(signature_part), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: expected three segments");
        return Err(JwtValidationError::MalformedToken);
    };

    if header_part.is_empty() || payload_part.is_empty() || signature_part.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty segment");
        return Err(JwtValidationError::MalformedToken);
    }

    let header_bytes = decode_segment(header_part, "header")?;
    let payload = decode_segment(payload_part, "payload")?;
    let signature = decode_segment(signature_part, "signature")?;

    let header: JwtHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    // header.payload is a prefix of the token; the length is bounded above
    let signing_input_len = header_part.len() + 1 + payload_part.len();
    let signing_input = token
        .get(..signing_input_len)
        .ok_or(JwtValidationError::MalformedToken)?;

    Ok(CompactJwt {
        header,
        signing_input,
        payload,
        signature,
    })
}

fn decode_segment(segment: &str, name: &'static str) -> Result<Vec<u8>, JwtValidationError> {
    URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = name, error = %e, "Failed to decode JWT segment");
        JwtValidationError::MalformedToken
    })
}

/// Validate the `iat` (issued-at) claim against an explicit `now` timestamp.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW at configuration time
    let clock_skew_secs = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from a JWK `x` member (base64url, no padding).
///
/// # Errors
///
/// - `InvalidEncoding` if `x` is not base64url
/// - `InvalidLength` if the decoded key is not exactly 32 bytes
pub fn decode_ed25519_public_key_jwk(
    x_b64url: &str,
) -> Result<[u8; ED25519_PUBLIC_KEY_LEN], KeyDecodeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(x_b64url)
        .map_err(|_| KeyDecodeError::InvalidEncoding)?;
    let len = bytes.len();
    <[u8; ED25519_PUBLIC_KEY_LEN]>::try_from(bytes).map_err(|_| KeyDecodeError::InvalidLength(len))
}

// =============================================================================
// Tests
// =============================================================================
