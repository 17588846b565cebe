//! Persisted records and provider wire types.
//!
//! Every token value is a `SecretString`; Debug output shows `[REDACTED]`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::secret::{is_blank, SecretString};
use common::types::{AccountId, ProfileId};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Persisted records
// ============================================================================

/// The OAuth token pair linking one account to the provider.
///
/// One row per account, upserted on device-flow completion and on every refresh.
#[derive(Clone)]
pub struct OAuthToken {
    pub account_id: AccountId,
    pub access_token: SecretString,
    /// Empty when the provider never issued one (refresh then needs a new device flow).
    pub refresh_token: SecretString,
    pub access_token_expires_at: DateTime<Utc>,
    pub scope: String,
    pub selected_profile_id: Option<ProfileId>,
    pub last_refreshed_at: DateTime<Utc>,
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("scope", &self.scope)
            .field("selected_profile_id", &self.selected_profile_id)
            .field("last_refreshed_at", &self.last_refreshed_at)
            .finish()
    }
}

impl OAuthToken {
    /// Build a fresh record from a grant.
    ///
    /// # Errors
    ///
    /// `InvalidLifetime` if the grant's `expires_in` is negative or out of range.
    pub fn from_grant(
        account_id: AccountId,
        grant: TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<Self, InvalidLifetime> {
        let access_token_expires_at = grant.expires_at(now)?;
        Ok(Self {
            account_id,
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .unwrap_or_else(|| SecretString::from(String::new())),
            access_token_expires_at,
            scope: grant.scope,
            selected_profile_id: None,
            last_refreshed_at: now,
        })
    }

    /// Apply a refresh grant. A grant without a refresh token keeps the old one.
    ///
    /// The record is left untouched when the lifetime is invalid.
    pub fn apply_grant(&mut self, grant: TokenGrant, now: DateTime<Utc>) -> Result<(), InvalidLifetime> {
        let access_token_expires_at = grant.expires_at(now)?;
        self.access_token = grant.access_token;
        if let Some(refresh_token) = grant.refresh_token {
            self.refresh_token = refresh_token;
        }
        self.access_token_expires_at = access_token_expires_at;
        if !grant.scope.is_empty() {
            self.scope = grant.scope;
        }
        self.last_refreshed_at = now;
        Ok(())
    }

    /// True when the access token expires within `margin` of `now`.
    pub fn is_access_token_expiring(&self, now: DateTime<Utc>, margin: ChronoDuration) -> bool {
        self.access_token_expires_at <= now + margin
    }

    pub fn can_refresh(&self) -> bool {
        !is_blank(&self.refresh_token)
    }
}

/// A provider game session for one (account, profile) pair.
#[derive(Clone)]
pub struct GameSession {
    pub account_id: AccountId,
    pub profile_id: ProfileId,
    pub session_token: SecretString,
    pub identity_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("account_id", &self.account_id)
            .field("profile_id", &self.profile_id)
            .field("session_token", &"[REDACTED]")
            .field("identity_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl GameSession {
    pub fn from_grant(account_id: AccountId, profile_id: ProfileId, grant: SessionGrant) -> Self {
        Self {
            account_id,
            profile_id,
            session_token: grant.session_token,
            identity_token: grant.identity_token,
            expires_at: grant.expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Audit-log actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DeviceCodeIssued,
    DeviceAuthorizationCompleted,
    OAuthTokenRefreshed,
    ProfileSelected,
    GameSessionCreated,
    GameSessionRefreshed,
    GameSessionTerminated,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::DeviceCodeIssued => "device_code_issued",
            AuditAction::DeviceAuthorizationCompleted => "device_authorization_completed",
            AuditAction::OAuthTokenRefreshed => "oauth_token_refreshed",
            AuditAction::ProfileSelected => "profile_selected",
            AuditAction::GameSessionCreated => "game_session_created",
            AuditAction::GameSessionRefreshed => "game_session_refreshed",
            AuditAction::GameSessionTerminated => "game_session_terminated",
        }
    }
}

/// One audit-log line. `detail` never contains token material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub account_id: Option<AccountId>,
    pub action: AuditAction,
    pub success: bool,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(account_id: Option<&AccountId>, action: AuditAction, success: bool) -> Self {
        Self {
            account_id: account_id.cloned(),
            action,
            success,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// Provider wire types
// ============================================================================

fn default_poll_interval() -> u64 {
    5
}

/// Device-code issuance response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Minimum seconds between polls.
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

/// Successful token endpoint response.
#[derive(Deserialize)]
pub struct TokenGrant {
    pub access_token: SecretString,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenGrant {
    /// Absolute access-token expiry for a grant received at `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, InvalidLifetime> {
        if self.expires_in < 0 {
            return Err(InvalidLifetime(self.expires_in));
        }
        ChronoDuration::try_seconds(self.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(InvalidLifetime(self.expires_in))
    }
}

/// A token lifetime that is negative or does not fit a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token lifetime out of range: {0}s")]
pub struct InvalidLifetime(pub i64);

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// OAuth error body (`authorization_pending`, `slow_down`, `expired_token`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Result of one device-token poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// The user has not finished. `slow_down` asks the caller to widen its interval.
    Pending { slow_down: bool },
    Authorized(TokenGrant),
}

/// Result of [`complete_device_authorization`](crate::services::SessionManager::complete_device_authorization).
#[derive(Debug)]
pub enum DeviceFlowStatus {
    Pending { slow_down: bool },
    Linked(OAuthToken),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    pub uuid: ProfileId,
    pub username: String,
}

/// Profile list response. `owner` is the provider account id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileList {
    pub owner: AccountId,
    #[serde(default)]
    pub profiles: Vec<GameProfile>,
}

impl ProfileList {
    pub fn contains(&self, profile_id: ProfileId) -> bool {
        self.profiles.iter().any(|p| p.uuid == profile_id)
    }
}

/// Game session create/refresh response.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub session_token: SecretString,
    pub identity_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGrant")
            .field("session_token", &"[REDACTED]")
            .field("identity_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
