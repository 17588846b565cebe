//! Session lifecycle manager.
//!
//! Orchestrates the device flow and game sessions on top of the provider
//! client and the repositories:
//!
//! - Device authorization start and single-step completion
//! - OAuth token refresh and profile selection
//! - Game session create / refresh / terminate / lookup
//!
//! Provider failures never mutate persisted state. After the provider has
//! already acted (refresh, session create, terminate) a failed local write is
//! logged at error level and the call still succeeds; the initial token save
//! on device-flow completion is the one write whose failure is surfaced.
//! Every operation appends an audit entry; audit failures are only logged.

use crate::errors::AuthError;
use crate::models::{
    AuditAction, AuditEntry, DeviceAuthorization, DeviceFlowStatus, GameProfile, GameSession,
    InvalidLifetime, OAuthToken, PollOutcome, ProfileList, TokenGrant,
};
use crate::observability::metrics;
use crate::repositories::{AuditLog, GameSessionRepository, OAuthTokenRepository};
use crate::services::error_classifier::{ErrorClassifier, UpstreamErrorCode};
use crate::services::hytale_client::HytaleApi;
use chrono::{Duration as ChronoDuration, Utc};
use common::types::{AccountId, ProfileId};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Access tokens this close to expiry are refreshed before use.
pub const ACCESS_TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

/// Orchestrates provider calls and persistence for one deployment.
#[derive(Clone)]
pub struct SessionManager {
    api: Arc<dyn HytaleApi>,
    tokens: Arc<dyn OAuthTokenRepository>,
    sessions: Arc<dyn GameSessionRepository>,
    audit: Arc<dyn AuditLog>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn HytaleApi>,
        tokens: Arc<dyn OAuthTokenRepository>,
        sessions: Arc<dyn GameSessionRepository>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            api,
            tokens,
            sessions,
            audit,
        }
    }

    // ------------------------------------------------------------------------
    // Device flow
    // ------------------------------------------------------------------------

    /// Issue a device code for the user to approve.
    #[instrument(skip_all)]
    pub async fn start_device_authorization(&self) -> Result<DeviceAuthorization, AuthError> {
        let result = self.api.request_device_code().await;

        let mut entry = AuditEntry::new(None, AuditAction::DeviceCodeIssued, result.is_ok());
        if let Err(e) = &result {
            entry = entry.with_detail(e.code());
        }
        self.record(entry).await;

        let authorization = result?;
        info!(
            target: "hytale_auth.session",
            expires_in = authorization.expires_in,
            interval = authorization.interval,
            "Device authorization started"
        );
        Ok(authorization)
    }

    /// Poll the device code once and, on approval, link the account.
    ///
    /// The owning account is the `owner` of the profile list the new access
    /// token can see. A previously selected profile is kept while the account
    /// still owns it; an account with exactly one profile gets it selected.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty device code (no provider call)
    /// - `DeviceAuthorization` for a terminal OAuth error (expired, denied)
    /// - `Upstream` for classified provider failures
    /// - `Database` if the token cannot be saved
    #[instrument(skip_all)]
    pub async fn complete_device_authorization(
        &self,
        device_code: &str,
    ) -> Result<DeviceFlowStatus, AuthError> {
        if device_code.trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "device_code is required".to_string(),
            ));
        }

        let grant = match self.api.poll_device_token(device_code).await {
            Ok(PollOutcome::Pending { slow_down }) => {
                return Ok(DeviceFlowStatus::Pending { slow_down });
            }
            Ok(PollOutcome::Authorized(grant)) => grant,
            Err(e) => {
                self.record(
                    AuditEntry::new(None, AuditAction::DeviceAuthorizationCompleted, false)
                        .with_detail(e.code()),
                )
                .await;
                return Err(e);
            }
        };

        let result = self.link_account(grant).await;
        match &result {
            Ok(token) => {
                self.record(AuditEntry::new(
                    Some(&token.account_id),
                    AuditAction::DeviceAuthorizationCompleted,
                    true,
                ))
                .await;
                info!(
                    target: "hytale_auth.session",
                    account_id = %token.account_id,
                    "Hytale account linked"
                );
            }
            Err(e) => {
                self.record(
                    AuditEntry::new(None, AuditAction::DeviceAuthorizationCompleted, false)
                        .with_detail(e.code()),
                )
                .await;
            }
        }
        result.map(DeviceFlowStatus::Linked)
    }

    async fn link_account(&self, grant: TokenGrant) -> Result<OAuthToken, AuthError> {
        let profiles = self.api.get_profiles(&grant.access_token).await?;
        if profiles.owner.as_str().is_empty() {
            error!(target: "hytale_auth.session", "Profile list has no owner");
            return Err(AuthError::Internal);
        }

        let now = Utc::now();
        let mut token = match self.tokens.find_by_account(&profiles.owner).await? {
            Some(mut existing) => {
                existing
                    .apply_grant(grant, now)
                    .map_err(|e| invalid_lifetime(&profiles.owner, e))?;
                existing
            }
            None => OAuthToken::from_grant(profiles.owner.clone(), grant, now)
                .map_err(|e| invalid_lifetime(&profiles.owner, e))?,
        };

        token.selected_profile_id = resolve_selection(token.selected_profile_id, &profiles);

        self.tokens.upsert(&token).await?;
        Ok(token)
    }

    /// Redeem the stored refresh token.
    ///
    /// # Errors
    ///
    /// - `AccountNotLinked` if no token is stored
    /// - `ReauthorizationRequired` if there is no refresh token or it was revoked
    /// - `Upstream` for classified provider failures
    #[instrument(skip_all, fields(account_id = %account_id))]
    pub async fn refresh_oauth_token(&self, account_id: &AccountId) -> Result<OAuthToken, AuthError> {
        let token = self.load_token(account_id).await?;
        self.refresh_loaded(token).await
    }

    async fn refresh_loaded(&self, mut token: OAuthToken) -> Result<OAuthToken, AuthError> {
        if !token.can_refresh() {
            return Err(AuthError::ReauthorizationRequired);
        }

        let grant = match self.api.refresh_token(&token.refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                self.record(
                    AuditEntry::new(Some(&token.account_id), AuditAction::OAuthTokenRefreshed, false)
                        .with_detail(e.code()),
                )
                .await;
                return Err(e);
            }
        };

        if let Err(e) = token.apply_grant(grant, Utc::now()) {
            let e = invalid_lifetime(&token.account_id, e);
            self.record(
                AuditEntry::new(Some(&token.account_id), AuditAction::OAuthTokenRefreshed, false)
                    .with_detail(e.code()),
            )
            .await;
            return Err(e);
        }

        // The provider may have rotated the refresh token; we cannot undo that
        match self.tokens.update_grant(&token).await {
            Ok(true) => {}
            Ok(false) => warn!(
                target: "hytale_auth.session",
                account_id = %token.account_id,
                "Token row removed during refresh, refreshed grant not stored"
            ),
            Err(e) => error!(
                target: "hytale_auth.session",
                account_id = %token.account_id,
                error = %e,
                "Failed to persist refreshed OAuth token"
            ),
        }

        self.record(AuditEntry::new(
            Some(&token.account_id),
            AuditAction::OAuthTokenRefreshed,
            true,
        ))
        .await;
        Ok(token)
    }

    // ------------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------------

    #[instrument(skip_all, fields(account_id = %account_id))]
    pub async fn list_profiles(&self, account_id: &AccountId) -> Result<ProfileList, AuthError> {
        let token = self.load_token(account_id).await?;
        let token = self.ensure_fresh(token).await?;
        self.api.get_profiles(&token.access_token).await
    }

    /// Select the profile future game sessions default to.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the account does not own `profile_id`
    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    pub async fn select_profile(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<GameProfile, AuthError> {
        let token = self.load_token(account_id).await?;
        let token = self.ensure_fresh(token).await?;
        let profiles = self.api.get_profiles(&token.access_token).await?;

        let Some(profile) = profiles.profiles.into_iter().find(|p| p.uuid == profile_id) else {
            self.record(
                AuditEntry::new(Some(account_id), AuditAction::ProfileSelected, false)
                    .with_detail("profile not owned"),
            )
            .await;
            return Err(AuthError::InvalidRequest(
                "The profile does not belong to this account".to_string(),
            ));
        };

        if !self.tokens.set_selected_profile(account_id, profile_id).await? {
            return Err(AuthError::AccountNotLinked);
        }

        self.record(
            AuditEntry::new(Some(account_id), AuditAction::ProfileSelected, true)
                .with_detail(profile_id.to_string()),
        )
        .await;
        Ok(profile)
    }

    // ------------------------------------------------------------------------
    // Game sessions
    // ------------------------------------------------------------------------

    /// Create a game session for `profile_id`, or the selected profile.
    ///
    /// The profile is resolved before any provider call.
    ///
    /// # Errors
    ///
    /// - `AccountNotLinked` if no token is stored
    /// - `NoProfileSelected` if no profile is given or selected
    /// - `Upstream` for classified provider failures (including the session limit)
    #[instrument(skip_all, fields(account_id = %account_id))]
    pub async fn create_game_session(
        &self,
        account_id: &AccountId,
        profile_id: Option<ProfileId>,
    ) -> Result<GameSession, AuthError> {
        let token = self.load_token(account_id).await?;
        let profile_id = profile_id
            .or(token.selected_profile_id)
            .ok_or(AuthError::NoProfileSelected)?;

        let token = self.ensure_fresh(token).await?;

        let grant = match self
            .api
            .create_game_session(&token.access_token, profile_id)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                if e.upstream().is_some_and(|f| f.is_session_limit()) {
                    warn!(
                        target: "hytale_auth.session",
                        account_id = %account_id,
                        "Concurrent game session limit reached"
                    );
                }
                self.record(
                    AuditEntry::new(Some(account_id), AuditAction::GameSessionCreated, false)
                        .with_detail(e.code()),
                )
                .await;
                return Err(e);
            }
        };

        let session = GameSession::from_grant(account_id.clone(), profile_id, grant);
        if let Err(e) = self.sessions.upsert(&session).await {
            error!(
                target: "hytale_auth.session",
                account_id = %account_id,
                profile_id = %profile_id,
                error = %e,
                "Failed to persist game session"
            );
        }

        self.record(
            AuditEntry::new(Some(account_id), AuditAction::GameSessionCreated, true)
                .with_detail(profile_id.to_string()),
        )
        .await;
        Ok(session)
    }

    /// Extend an existing game session.
    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    pub async fn refresh_game_session(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<GameSession, AuthError> {
        let existing = self
            .sessions
            .find(account_id, profile_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let grant = match self.api.refresh_game_session(&existing.session_token).await {
            Ok(grant) => grant,
            Err(e) => {
                self.record(
                    AuditEntry::new(Some(account_id), AuditAction::GameSessionRefreshed, false)
                        .with_detail(e.code()),
                )
                .await;
                return Err(e);
            }
        };

        let session = GameSession::from_grant(account_id.clone(), profile_id, grant);
        if let Err(e) = self.sessions.upsert(&session).await {
            error!(
                target: "hytale_auth.session",
                account_id = %account_id,
                profile_id = %profile_id,
                error = %e,
                "Failed to persist refreshed game session"
            );
        }

        self.record(AuditEntry::new(
            Some(account_id),
            AuditAction::GameSessionRefreshed,
            true,
        ))
        .await;
        Ok(session)
    }

    /// End a game session at the provider and delete it locally.
    ///
    /// A provider `NOT_FOUND` means the session already ended; the local row is
    /// still removed.
    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    pub async fn terminate_game_session(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<(), AuthError> {
        let existing = self
            .sessions
            .find(account_id, profile_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        match self.api.terminate_game_session(&existing.session_token).await {
            Ok(()) => {}
            Err(e) if e
                .upstream()
                .is_some_and(|f| f.code == UpstreamErrorCode::NotFound) =>
            {
                info!(
                    target: "hytale_auth.session",
                    account_id = %account_id,
                    "Game session already ended at provider"
                );
            }
            Err(e) => {
                self.record(
                    AuditEntry::new(Some(account_id), AuditAction::GameSessionTerminated, false)
                        .with_detail(e.code()),
                )
                .await;
                return Err(e);
            }
        }

        if let Err(e) = self.sessions.delete(account_id, profile_id).await {
            error!(
                target: "hytale_auth.session",
                account_id = %account_id,
                profile_id = %profile_id,
                error = %e,
                "Failed to delete terminated game session"
            );
        }

        self.record(AuditEntry::new(
            Some(account_id),
            AuditAction::GameSessionTerminated,
            true,
        ))
        .await;
        Ok(())
    }

    /// Look up a live game session. Expired rows are deleted on sight.
    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    pub async fn get_game_session(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<Option<GameSession>, AuthError> {
        let Some(session) = self.sessions.find(account_id, profile_id).await? else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) {
            if let Err(e) = self.sessions.delete(account_id, profile_id).await {
                warn!(
                    target: "hytale_auth.session",
                    account_id = %account_id,
                    error = %e,
                    "Failed to delete expired game session"
                );
            }
            return Ok(None);
        }

        Ok(Some(session))
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn load_token(&self, account_id: &AccountId) -> Result<OAuthToken, AuthError> {
        if account_id.as_str().trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "account_id is required".to_string(),
            ));
        }
        self.tokens
            .find_by_account(account_id)
            .await?
            .ok_or(AuthError::AccountNotLinked)
    }

    async fn ensure_fresh(&self, token: OAuthToken) -> Result<OAuthToken, AuthError> {
        let margin = ChronoDuration::seconds(ACCESS_TOKEN_REFRESH_MARGIN_SECONDS);
        if token.is_access_token_expiring(Utc::now(), margin) {
            info!(
                target: "hytale_auth.session",
                account_id = %token.account_id,
                "Access token near expiry, refreshing"
            );
            return self.refresh_loaded(token).await;
        }
        Ok(token)
    }

    async fn record(&self, entry: AuditEntry) {
        metrics::record_session_operation(entry.action.as_str(), entry.success);
        if let Err(e) = self.audit.append(&entry).await {
            error!(
                target: "hytale_auth.session",
                action = entry.action.as_str(),
                error = %e,
                "Failed to append audit entry"
            );
        }
    }
}

fn invalid_lifetime(account_id: &AccountId, e: InvalidLifetime) -> AuthError {
    error!(
        target: "hytale_auth.session",
        account_id = %account_id,
        error = %e,
        "Provider issued an unusable token lifetime"
    );
    AuthError::Upstream(ErrorClassifier::default().malformed_response("token grant", &e.to_string()))
}

/// Keep a still-owned selection; otherwise auto-select a sole profile.
fn resolve_selection(current: Option<ProfileId>, profiles: &ProfileList) -> Option<ProfileId> {
    if let Some(selected) = current {
        if profiles.contains(selected) {
            return Some(selected);
        }
    }
    match profiles.profiles.as_slice() {
        [only] => Some(only.uuid),
        _ => None,
    }
}
