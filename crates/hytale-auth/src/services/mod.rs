//! Service layer.
//!
//! - `hytale_client` - provider HTTP calls behind the `HytaleApi` seam
//! - `error_classifier` - maps provider failures to `UpstreamFailure`
//! - `session_manager` - device-flow completion and game-session lifecycle

pub mod error_classifier;
pub mod hytale_client;
pub mod session_manager;

pub use error_classifier::{ErrorClassifier, UpstreamErrorCode, UpstreamFailure};
pub use hytale_client::{HytaleApi, HytaleClient, HytaleEndpoints};
pub use session_manager::SessionManager;

use crate::errors::AuthError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `fut` until it completes or `cancel_token` fires.
///
/// Cancellation drops the future, which aborts any in-flight provider request.
pub async fn with_cancellation<T, F>(cancel_token: &CancellationToken, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    tokio::select! {
        result = fut => result,
        _ = cancel_token.cancelled() => Err(AuthError::Cancelled),
    }
}
