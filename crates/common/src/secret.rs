//! Secret types for protecting credentials from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every provider credential held by
//! the auth crates: OAuth access and refresh tokens, game session tokens and
//! identity tokens. `SecretString` implements `Debug` with redaction, so any
//! struct deriving `Debug` over a token field is safe to log.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{bearer, SecretString};
//!
//! #[derive(Debug)]
//! struct StoredGrant {
//!     account_id: String,
//!     access_token: SecretString,
//! }
//!
//! let grant = StoredGrant {
//!     account_id: "acct-1".to_string(),
//!     access_token: SecretString::from("at-123"),
//! };
//!
//! assert!(!format!("{grant:?}").contains("at-123"));
//! assert_eq!(bearer(&grant.access_token), "Bearer at-123");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render an `Authorization` header value for a bearer credential.
///
/// The returned `String` contains the raw token; pass it straight to the HTTP
/// client and never log it.
#[must_use]
pub fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

/// Returns true when the secret is empty or whitespace only.
#[must_use]
pub fn is_blank(secret: &SecretString) -> bool {
    secret.expose_secret().trim().is_empty()
}
