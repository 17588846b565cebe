//! Hytale auth error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; provider response bodies, URLs and database
//! errors are logged server-side only.

use crate::auth::TokenRejection;
use crate::services::error_classifier::UpstreamFailure;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Error type for every session-lifecycle and device-flow operation.
///
/// Maps to HTTP status codes:
/// - InvalidRequest, NoProfileSelected, DeviceAuthorization: 400
/// - InvalidToken, ReauthorizationRequired: 401
/// - AccountNotLinked, SessionNotFound: 404
/// - Cancelled: 408
/// - RateLimitExceeded: 429
/// - Database, Internal: 500
/// - Upstream: the classified status (400-503)
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No Hytale account is linked")]
    AccountNotLinked,

    #[error("No game profile selected")]
    NoProfileSelected,

    #[error("Game session not found")]
    SessionNotFound,

    #[error("Hytale authorization must be renewed")]
    ReauthorizationRequired,

    #[error("Invalid token: {0:?}")]
    InvalidToken(TokenRejection),

    #[error("Device authorization failed: {error}")]
    DeviceAuthorization {
        error: String,
        description: Option<String>,
    },

    #[error("Upstream error: {0}")]
    Upstream(UpstreamFailure),

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal server error")]
    Internal,
}

impl AuthError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InvalidRequest(_)
            | AuthError::NoProfileSelected
            | AuthError::DeviceAuthorization { .. } => 400,
            AuthError::InvalidToken(_) | AuthError::ReauthorizationRequired => 401,
            AuthError::AccountNotLinked | AuthError::SessionNotFound => 404,
            AuthError::Cancelled => 408,
            AuthError::RateLimitExceeded { .. } => 429,
            AuthError::Database(_) | AuthError::Internal => 500,
            AuthError::Upstream(failure) => failure.http_status,
        }
    }

    /// Machine-readable error code returned in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidRequest(_) => "INVALID_REQUEST",
            AuthError::AccountNotLinked => "ACCOUNT_NOT_LINKED",
            AuthError::NoProfileSelected => "NO_PROFILE_SELECTED",
            AuthError::SessionNotFound => "SESSION_NOT_FOUND",
            AuthError::ReauthorizationRequired => "REAUTHORIZATION_REQUIRED",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::DeviceAuthorization { .. } => "DEVICE_AUTHORIZATION_FAILED",
            AuthError::Upstream(failure) => failure.code.as_str(),
            AuthError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::Database(_) => "DATABASE_ERROR",
            AuthError::Cancelled => "CANCELLED",
            AuthError::Internal => "INTERNAL_ERROR",
        }
    }

    /// The classified provider failure, if this error came from the provider.
    pub fn upstream(&self) -> Option<&UpstreamFailure> {
        match self {
            AuthError::Upstream(failure) => Some(failure),
            _ => None,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AuthError::InvalidRequest(reason) => reason.clone(),
            AuthError::AccountNotLinked => {
                "No Hytale account is linked. Complete device authorization first.".to_string()
            }
            AuthError::NoProfileSelected => {
                "Select a game profile before creating a game session.".to_string()
            }
            AuthError::SessionNotFound => "No game session exists for this profile.".to_string(),
            AuthError::ReauthorizationRequired => {
                "Hytale authorization has expired. Complete device authorization again."
                    .to_string()
            }
            AuthError::InvalidToken(rejection) => rejection.to_string(),
            AuthError::DeviceAuthorization { error, .. } => match error.as_str() {
                "expired_token" => {
                    "The device code has expired. Start authorization again.".to_string()
                }
                "access_denied" => "The authorization request was denied.".to_string(),
                _ => "Device authorization failed.".to_string(),
            },
            AuthError::Upstream(failure) => failure.user_message.to_string(),
            AuthError::RateLimitExceeded { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            AuthError::Database(_) => "An internal database error occurred".to_string(),
            AuthError::Cancelled => "The operation was cancelled".to_string(),
            AuthError::Internal => "An internal error occurred".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Database(err) => {
                tracing::error!(target: "hytale_auth.database", error = %err, "Database operation failed");
            }
            AuthError::Upstream(failure) => {
                tracing::warn!(
                    target: "hytale_auth.client",
                    code = failure.code.as_str(),
                    detail = %failure.internal_detail,
                    "Provider request failed"
                );
            }
            AuthError::InvalidToken(rejection) => {
                tracing::debug!(target: "hytale_auth.jwt", reason = rejection.reason(), "Rejected token");
            }
            _ => {}
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if let AuthError::InvalidToken(_) = self {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"hytale-auth\", error=\"invalid_token\""),
            );
        }

        if let AuthError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.to_string())
    }
}

impl From<UpstreamFailure> for AuthError {
    fn from(failure: UpstreamFailure) -> Self {
        AuthError::Upstream(failure)
    }
}

impl From<TokenRejection> for AuthError {
    fn from(rejection: TokenRejection) -> Self {
        AuthError::InvalidToken(rejection)
    }
}
