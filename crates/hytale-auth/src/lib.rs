//! Hytale Account Auth Library
//!
//! Links a game-hosting account to a Hytale account through the OAuth 2.0
//! Device Authorization Grant and manages the game sessions derived from it:
//!
//! - Device-code issuance and caller-driven polling
//! - OAuth token refresh and profile selection
//! - Game session create / refresh / terminate
//! - Ed25519 verification of provider session and identity tokens (JWKS)
//! - Per-identifier token-bucket rate limiting of every endpoint class
//!
//! # Architecture
//!
//! ```text
//! middleware/rate_limit.rs -> services/session_manager.rs -> services/hytale_client.rs
//!                                       |                            |
//!                              repositories/*.rs          services/error_classifier.rs
//!
//! auth/jwt.rs -> auth/jwks.rs   (token verification, independent of requests)
//! ```
//!
//! # Modules
//!
//! - `auth` - JWKS cache and token validation
//! - `config` - Configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `middleware` - Axum rate-limit layer
//! - `models` - Persisted records and provider wire types
//! - `rate_limit` - Token-bucket limiter
//! - `repositories` - Persistence seams (Postgres and in-memory)
//! - `services` - Provider client, error classifier, session lifecycle
//! - `state` - Component wiring from configuration
//! - `tasks` - Background maintenance tasks

pub mod auth;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod rate_limit;
pub mod repositories;
pub mod services;
pub mod state;
pub mod tasks;
