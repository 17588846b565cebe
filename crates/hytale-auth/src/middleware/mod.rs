//! Middleware for routes built on this library.
//!
//! # Components
//!
//! - `rate_limit` - Token-bucket admission for an endpoint class

pub mod rate_limit;

pub use rate_limit::enforce_rate_limit;
