//! Common utilities and types shared across the Hytale auth crates.

#![warn(clippy::pedantic)]

/// Module for account and profile identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact-JWT parsing utilities (segments, header, iat, keys)
pub mod jwt;
