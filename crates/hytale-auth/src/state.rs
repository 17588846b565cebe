//! Component wiring from configuration.
//!
//! Builds the provider client, JWKS cache, token validator, rate limiters and
//! session manager once at startup. Everything here is cheap to clone and
//! safe to share across tasks.

use crate::auth::{JwksCache, TokenValidator};
use crate::config::Config;
use crate::errors::AuthError;
use crate::rate_limit::EndpointRateLimiters;
use crate::repositories::{
    AuditLog, GameSessionRepository, InMemoryStore, OAuthTokenRepository, PgStore,
};
use crate::services::{ErrorClassifier, HytaleApi, HytaleClient, HytaleEndpoints, SessionManager};
use crate::tasks::{start_bucket_sweeper, BucketSweeperConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared components for one deployment.
#[derive(Clone)]
pub struct AuthComponents {
    pub config: Config,
    pub endpoints: HytaleEndpoints,
    pub jwks: Arc<JwksCache>,
    pub validator: Arc<TokenValidator>,
    pub rate_limiters: EndpointRateLimiters,
    pub sessions: SessionManager,
}

impl AuthComponents {
    /// Wire every component from `config`.
    ///
    /// Uses PostgreSQL when `database_url` is set (connecting lazily) and an
    /// in-memory store otherwise.
    ///
    /// # Errors
    ///
    /// - `AuthError::Internal` if the HTTP client cannot be built
    /// - `AuthError::Database` if the database URL is invalid
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let endpoints = HytaleEndpoints::from_config(config);

        let classifier = ErrorClassifier::new(config.session_limit_indicators.clone());
        let client: Arc<dyn HytaleApi> = Arc::new(HytaleClient::new(
            endpoints.clone(),
            config.client_id.clone(),
            config.oauth_scope.clone(),
            classifier,
            config.http_timeout,
        )?);

        let jwks = Arc::new(JwksCache::with_refresh_interval(
            endpoints.jwks_url(),
            config.jwks_refresh_interval,
        ));
        let validator = Arc::new(
            TokenValidator::new(Arc::clone(&jwks), config.jwt_clock_skew)
                .with_default_audience(config.expected_audience.clone()),
        );

        let (tokens, sessions, audit) = build_store(config)?;
        let manager = SessionManager::new(client, tokens, sessions, audit);

        info!(
            target: "hytale_auth.state",
            environment = ?config.environment,
            oauth_base = %endpoints.oauth_base,
            persistent = config.database_url.is_some(),
            "Auth components initialized"
        );

        Ok(Self {
            config: config.clone(),
            endpoints,
            jwks,
            validator,
            rate_limiters: EndpointRateLimiters::from_settings(&config.rate_limits),
            sessions: manager,
        })
    }

    /// Spawn the background maintenance a long-running host needs: the
    /// rate-limit bucket sweeper with its default cadence.
    ///
    /// Must be called from within a Tokio runtime. The task exits when
    /// `cancel_token` is cancelled.
    pub fn spawn_maintenance(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        self.spawn_maintenance_with(BucketSweeperConfig::default(), cancel_token)
    }

    pub fn spawn_maintenance_with(
        &self,
        sweeper: BucketSweeperConfig,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(start_bucket_sweeper(
            self.rate_limiters.clone(),
            sweeper,
            cancel_token,
        ))
    }
}

type Stores = (
    Arc<dyn OAuthTokenRepository>,
    Arc<dyn GameSessionRepository>,
    Arc<dyn AuditLog>,
);

fn build_store(config: &Config) -> Result<Stores, AuthError> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgStore::connect_lazy(url)?);
            Ok((store.clone(), store.clone(), store))
        }
        None => {
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store.clone(), store))
        }
    }
}
