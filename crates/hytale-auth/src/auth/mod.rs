//! Provider token verification.
//!
//! - `jwks` - cached Ed25519 signing keys
//! - `jwt` - session and identity token validation
//! - `claims` - verified claim types

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::{IdentityClaims, TokenClaims};
pub use jwks::{JwksCache, JwksError, SigningKey};
pub use jwt::{TokenRejection, TokenValidator};
