//! # Hytale Auth Test Utilities
//!
//! Shared test utilities for the `hytale-auth` crate.
//!
//! This crate provides:
//! - Deterministic Ed25519 keypairs that publish themselves as JWKs
//! - A claims builder for session and identity tokens
//! - A wiremock-backed stand-in for the Hytale OAuth, account and session hosts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hytale_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let provider = MockHytaleProvider::start().await;
//!     let keypair = TestKeypair::new(1, "key-1");
//!     provider.mount_jwks(&[&keypair]).await;
//!
//!     let token = keypair.sign_claims(&TestClaimsBuilder::new().for_subject("acct-1").build());
//! }
//! ```

pub mod keys;
pub mod mock_provider;
pub mod token_builders;

// Re-export commonly used items
pub use keys::*;
pub use mock_provider::*;
pub use token_builders::*;
