//! Hytale auth configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use crate::rate_limit::{IdentifierStrategy, RateLimitConfig};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default provider HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Default JWKS refresh interval in seconds (1 hour).
pub const DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS: u64 = 3600;

/// Default OAuth scope requested during device authorization.
pub const DEFAULT_OAUTH_SCOPE: &str = "openid offline auth:server";

/// Default substrings that mark a 403 body as a concurrent-session-limit error.
pub const DEFAULT_SESSION_LIMIT_INDICATORS: &[&str] = &[
    "session limit",
    "session_limit",
    "too many sessions",
    "maximum sessions",
    "max sessions",
    "concurrent",
];

/// Upstream environment. Each maps to one fixed provider domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HytaleEnvironment {
    Production,
    Staging,
}

impl HytaleEnvironment {
    /// Root domain the provider hosts live under.
    pub fn domain(self) -> &'static str {
        match self {
            HytaleEnvironment::Production => "hytale.com",
            HytaleEnvironment::Staging => "arcanitegames.ca",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(HytaleEnvironment::Production),
            "staging" => Some(HytaleEnvironment::Staging),
            _ => None,
        }
    }
}

/// Rate limits for each endpoint class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    /// Device-code issuance. Tightest: few requests per long window.
    pub device_code: RateLimitConfig,
    /// Device-code polling.
    pub token_poll: RateLimitConfig,
    /// Profile listing and selection.
    pub profiles: RateLimitConfig,
    /// Game session create / refresh / terminate.
    pub sessions: RateLimitConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            device_code: RateLimitConfig::new(
                5,
                Duration::from_secs(900),
                IdentifierStrategy::ClientAddress,
            ),
            token_poll: RateLimitConfig::new(
                30,
                Duration::from_secs(60),
                IdentifierStrategy::ClientAddress,
            ),
            profiles: RateLimitConfig::new(
                30,
                Duration::from_secs(60),
                IdentifierStrategy::AccountId,
            ),
            sessions: RateLimitConfig::new(
                20,
                Duration::from_secs(60),
                IdentifierStrategy::AccountId,
            ),
        }
    }
}

/// Hytale auth configuration.
#[derive(Clone)]
pub struct Config {
    /// OAuth client id registered with the provider.
    pub client_id: String,

    /// Production or staging provider hosts.
    pub environment: HytaleEnvironment,

    /// Send every provider call to this base URL instead (proxies, tests).
    pub base_url_override: Option<String>,

    /// OAuth scope requested at device-code issuance.
    pub oauth_scope: String,

    /// Timeout applied to every provider call.
    pub http_timeout: Duration,

    /// How long a fetched JWKS is trusted before a refresh.
    pub jwks_refresh_interval: Duration,

    /// Allowed `iat` clock skew.
    pub jwt_clock_skew: Duration,

    /// Audience required on provider tokens, if any.
    pub expected_audience: Option<String>,

    /// Lower-cased 403 body substrings that signal the session limit.
    pub session_limit_indicators: Vec<String>,

    /// Per-endpoint-class rate limits.
    pub rate_limits: RateLimitSettings,

    /// PostgreSQL connection URL; in-memory storage is used when absent.
    pub database_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client_id", &self.client_id)
            .field("environment", &self.environment)
            .field("base_url_override", &self.base_url_override)
            .field("oauth_scope", &self.oauth_scope)
            .field("http_timeout", &self.http_timeout)
            .field("jwks_refresh_interval", &self.jwks_refresh_interval)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("expected_audience", &self.expected_audience)
            .field("session_limit_indicators", &self.session_limit_indicators)
            .field("rate_limits", &self.rate_limits)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let client_id = vars
            .get("HYTALE_CLIENT_ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("HYTALE_CLIENT_ID".to_string()))?;

        let environment = match vars.get("HYTALE_ENVIRONMENT") {
            Some(value) => HytaleEnvironment::parse(value).ok_or_else(|| {
                ConfigError::InvalidEnvironment(format!(
                    "HYTALE_ENVIRONMENT must be 'production' or 'staging', got '{}'",
                    value
                ))
            })?,
            None => HytaleEnvironment::Production,
        };

        let base_url_override = vars
            .get("HYTALE_BASE_URL_OVERRIDE")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let oauth_scope = vars
            .get("HYTALE_OAUTH_SCOPE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_OAUTH_SCOPE.to_string());

        let http_timeout = parse_seconds(
            vars,
            "HYTALE_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?;

        let jwks_refresh_interval = parse_seconds(
            vars,
            "JWKS_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS,
        )?;

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            let value = value.unsigned_abs();
            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let expected_audience = vars
            .get("HYTALE_TOKEN_AUDIENCE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let session_limit_indicators = match vars.get("HYTALE_SESSION_LIMIT_INDICATORS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_SESSION_LIMIT_INDICATORS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        };

        let defaults = RateLimitSettings::default();
        let rate_limits = RateLimitSettings {
            device_code: parse_rate_limit(vars, "DEVICE_CODE", defaults.device_code)?,
            token_poll: parse_rate_limit(vars, "TOKEN_POLL", defaults.token_poll)?,
            profiles: parse_rate_limit(vars, "PROFILES", defaults.profiles)?,
            sessions: parse_rate_limit(vars, "SESSIONS", defaults.sessions)?,
        };

        let database_url = vars
            .get("DATABASE_URL")
            .cloned()
            .filter(|v| !v.is_empty());

        Ok(Config {
            client_id,
            environment,
            base_url_override,
            oauth_scope,
            http_timeout,
            jwks_refresh_interval,
            jwt_clock_skew,
            expected_audience,
            session_limit_indicators,
            rate_limits,
            database_url,
        })
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}

/// Reads `RATE_LIMIT_<CLASS>_REQUESTS` and `RATE_LIMIT_<CLASS>_WINDOW_SECONDS`.
fn parse_rate_limit(
    vars: &HashMap<String, String>,
    class: &str,
    default: RateLimitConfig,
) -> Result<RateLimitConfig, ConfigError> {
    let requests_var = format!("RATE_LIMIT_{}_REQUESTS", class);
    let window_var = format!("RATE_LIMIT_{}_WINDOW_SECONDS", class);

    let requests_per_window = match vars.get(&requests_var) {
        Some(value_str) => {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidRateLimit(format!(
                    "{} must be a valid positive integer, got '{}': {}",
                    requests_var, value_str, e
                ))
            })?;
            if value == 0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{} must be greater than 0",
                    requests_var
                )));
            }
            value
        }
        None => default.requests_per_window,
    };

    let window = match vars.get(&window_var) {
        Some(value_str) => {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidRateLimit(format!(
                    "{} must be a valid positive integer, got '{}': {}",
                    window_var, value_str, e
                ))
            })?;
            if value == 0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{} must be greater than 0",
                    window_var
                )));
            }
            Duration::from_secs(value)
        }
        None => default.window,
    };

    Ok(RateLimitConfig::new(
        requests_per_window,
        window,
        default.strategy,
    ))
}
