//! Upstream failure classification.
//!
//! Every non-2xx provider response is turned into an [`UpstreamFailure`] here so
//! the rest of the crate deals in one taxonomy. The classification is by HTTP
//! status, with one body-content rule: a 403 mentioning a concurrent-session
//! limit becomes `SESSION_LIMIT_EXCEEDED`.

use crate::config::DEFAULT_SESSION_LIMIT_INDICATORS;

/// Maximum number of body characters kept in the internal detail.
const MAX_DETAIL_BODY_CHARS: usize = 512;

/// Upstream error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    SessionLimitExceeded,
    NotFound,
    RateLimited,
    HytaleServerError,
    ServiceUnavailable,
    UpstreamError,
}

impl UpstreamErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamErrorCode::BadRequest => "BAD_REQUEST",
            UpstreamErrorCode::Unauthorized => "UNAUTHORIZED",
            UpstreamErrorCode::Forbidden => "FORBIDDEN",
            UpstreamErrorCode::SessionLimitExceeded => "SESSION_LIMIT_EXCEEDED",
            UpstreamErrorCode::NotFound => "NOT_FOUND",
            UpstreamErrorCode::RateLimited => "RATE_LIMITED",
            UpstreamErrorCode::HytaleServerError => "HYTALE_SERVER_ERROR",
            UpstreamErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            UpstreamErrorCode::UpstreamError => "UPSTREAM_ERROR",
        }
    }
}

/// A classified provider failure.
///
/// `user_message` is safe to return to callers. `internal_detail` carries the
/// URL and a truncated body and must only be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub code: UpstreamErrorCode,
    pub user_message: &'static str,
    /// Status code surfaced to our own callers.
    pub http_status: u16,
    /// Status code the provider actually returned (None for transport failures).
    pub upstream_status: Option<u16>,
    pub internal_detail: String,
}

impl UpstreamFailure {
    /// True when the provider refused because the account hit its concurrent session cap.
    pub fn is_session_limit(&self) -> bool {
        self.code == UpstreamErrorCode::SessionLimitExceeded
    }
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.user_message)
    }
}

/// Maps provider HTTP failures into [`UpstreamFailure`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    session_limit_indicators: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_SESSION_LIMIT_INDICATORS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        )
    }
}

impl ErrorClassifier {
    /// Indicators are matched case-insensitively against 403 bodies.
    pub fn new(session_limit_indicators: Vec<String>) -> Self {
        Self {
            session_limit_indicators: session_limit_indicators
                .into_iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Classify a non-success response.
    pub fn classify(&self, status: u16, body: &str, url: &str) -> UpstreamFailure {
        let (code, user_message, http_status) = match status {
            400 => (
                UpstreamErrorCode::BadRequest,
                "The identity provider rejected the request",
                400,
            ),
            401 => (
                UpstreamErrorCode::Unauthorized,
                "The account authorization is no longer valid",
                401,
            ),
            403 if self.mentions_session_limit(body) => (
                UpstreamErrorCode::SessionLimitExceeded,
                "The account has reached its concurrent game session limit",
                403,
            ),
            403 => (
                UpstreamErrorCode::Forbidden,
                "The identity provider denied access",
                403,
            ),
            404 => (
                UpstreamErrorCode::NotFound,
                "The requested resource was not found at the identity provider",
                404,
            ),
            429 => (
                UpstreamErrorCode::RateLimited,
                "The identity provider is rate limiting requests",
                429,
            ),
            500 => (
                UpstreamErrorCode::HytaleServerError,
                "The identity provider encountered an error",
                502,
            ),
            503 => (
                UpstreamErrorCode::ServiceUnavailable,
                "The identity provider is temporarily unavailable",
                503,
            ),
            _ => (
                UpstreamErrorCode::UpstreamError,
                "Unexpected response from the identity provider",
                502,
            ),
        };

        UpstreamFailure {
            code,
            user_message,
            http_status,
            upstream_status: Some(status),
            internal_detail: format!(
                "{} returned {}: {}",
                url,
                status,
                truncate(body, MAX_DETAIL_BODY_CHARS)
            ),
        }
    }

    /// Timeout, connect failure, or other error before a status was received.
    pub fn transport_failure(&self, url: &str, error: &str) -> UpstreamFailure {
        UpstreamFailure {
            code: UpstreamErrorCode::ServiceUnavailable,
            user_message: "The identity provider is temporarily unavailable",
            http_status: 503,
            upstream_status: None,
            internal_detail: format!("{} request failed: {}", url, error),
        }
    }

    /// A 2xx response whose body could not be decoded.
    pub fn malformed_response(&self, url: &str, error: &str) -> UpstreamFailure {
        UpstreamFailure {
            code: UpstreamErrorCode::UpstreamError,
            user_message: "Unexpected response from the identity provider",
            http_status: 502,
            upstream_status: None,
            internal_detail: format!("{} returned an unreadable body: {}", url, error),
        }
    }

    fn mentions_session_limit(&self, body: &str) -> bool {
        let body = body.to_lowercase();
        self.session_limit_indicators
            .iter()
            .any(|indicator| body.contains(indicator.as_str()))
    }
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", body.get(..idx).unwrap_or_default()),
        None => body.to_string(),
    }
}
