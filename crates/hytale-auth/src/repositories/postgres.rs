//! PostgreSQL repositories.
//!
//! Expected schema (migrations are managed outside this crate):
//!
//! ```sql
//! CREATE TABLE hytale_oauth_tokens (
//!     account_id              TEXT PRIMARY KEY,
//!     access_token            TEXT NOT NULL,
//!     refresh_token           TEXT NOT NULL,
//!     access_token_expires_at TIMESTAMPTZ NOT NULL,
//!     scope                   TEXT NOT NULL,
//!     selected_profile_id     UUID,
//!     last_refreshed_at       TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE hytale_game_sessions (
//!     account_id     TEXT NOT NULL,
//!     profile_id     UUID NOT NULL,
//!     session_token  TEXT NOT NULL,
//!     identity_token TEXT NOT NULL,
//!     expires_at     TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (account_id, profile_id)
//! );
//!
//! CREATE TABLE hytale_auth_audit_log (
//!     id          BIGSERIAL PRIMARY KEY,
//!     account_id  TEXT,
//!     action      TEXT NOT NULL,
//!     success     BOOLEAN NOT NULL,
//!     detail      TEXT,
//!     occurred_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Token columns are never logged

use crate::errors::AuthError;
use crate::models::{AuditEntry, GameSession, OAuthToken};
use crate::repositories::{AuditLog, GameSessionRepository, OAuthTokenRepository};
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::{AccountId, ProfileId};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// sqlx-backed store for tokens, sessions and the audit log.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect lazily; the first query opens the connection.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Database` if the URL cannot be parsed.
    pub fn connect_lazy(database_url: &str) -> Result<Self, AuthError> {
        let pool = PgPool::connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }
}

#[async_trait::async_trait]
impl OAuthTokenRepository for PgStore {
    #[instrument(skip_all, fields(account_id = %account_id))]
    async fn find_by_account(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<OAuthToken>, AuthError> {
        let row: Option<OAuthTokenRow> = sqlx::query_as(
            r#"
            SELECT account_id, access_token, refresh_token, access_token_expires_at,
                   scope, selected_profile_id, last_refreshed_at
            FROM hytale_oauth_tokens
            WHERE account_id = $1
            "#,
        )
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OAuthToken::from))
    }

    #[instrument(skip_all, fields(account_id = %token.account_id))]
    async fn upsert(&self, token: &OAuthToken) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO hytale_oauth_tokens (
                account_id, access_token, refresh_token, access_token_expires_at,
                scope, selected_profile_id, last_refreshed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id) DO UPDATE
            SET access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                access_token_expires_at = EXCLUDED.access_token_expires_at,
                scope = EXCLUDED.scope,
                selected_profile_id = EXCLUDED.selected_profile_id,
                last_refreshed_at = EXCLUDED.last_refreshed_at
            "#,
        )
        .bind(token.account_id.as_str())
        .bind(token.access_token.expose_secret())
        .bind(token.refresh_token.expose_secret())
        .bind(token.access_token_expires_at)
        .bind(&token.scope)
        .bind(token.selected_profile_id.map(|p| p.0))
        .bind(token.last_refreshed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(account_id = %token.account_id))]
    async fn update_grant(&self, token: &OAuthToken) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE hytale_oauth_tokens
            SET access_token = $2,
                refresh_token = $3,
                access_token_expires_at = $4,
                scope = $5,
                last_refreshed_at = $6
            WHERE account_id = $1
            "#,
        )
        .bind(token.account_id.as_str())
        .bind(token.access_token.expose_secret())
        .bind(token.refresh_token.expose_secret())
        .bind(token.access_token_expires_at)
        .bind(&token.scope)
        .bind(token.last_refreshed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    async fn set_selected_profile(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE hytale_oauth_tokens
            SET selected_profile_id = $2
            WHERE account_id = $1
            "#,
        )
        .bind(account_id.as_str())
        .bind(profile_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl GameSessionRepository for PgStore {
    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    async fn find(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<Option<GameSession>, AuthError> {
        let row: Option<GameSessionRow> = sqlx::query_as(
            r#"
            SELECT account_id, profile_id, session_token, identity_token, expires_at
            FROM hytale_game_sessions
            WHERE account_id = $1 AND profile_id = $2
            "#,
        )
        .bind(account_id.as_str())
        .bind(profile_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(GameSession::from))
    }

    #[instrument(skip_all, fields(account_id = %session.account_id, profile_id = %session.profile_id))]
    async fn upsert(&self, session: &GameSession) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO hytale_game_sessions (
                account_id, profile_id, session_token, identity_token, expires_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id, profile_id) DO UPDATE
            SET session_token = EXCLUDED.session_token,
                identity_token = EXCLUDED.identity_token,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.account_id.as_str())
        .bind(session.profile_id.0)
        .bind(session.session_token.expose_secret())
        .bind(session.identity_token.expose_secret())
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip_all, fields(account_id = %account_id, profile_id = %profile_id))]
    async fn delete(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            DELETE FROM hytale_game_sessions
            WHERE account_id = $1 AND profile_id = $2
            "#,
        )
        .bind(account_id.as_str())
        .bind(profile_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl AuditLog for PgStore {
    #[instrument(skip_all, fields(action = entry.action.as_str()))]
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO hytale_auth_audit_log (account_id, action, success, detail, occurred_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.account_id.as_ref().map(AccountId::as_str))
        .bind(entry.action.as_str())
        .bind(entry.success)
        .bind(entry.detail.as_deref())
        .bind(entry.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct OAuthTokenRow {
    account_id: String,
    access_token: String,
    refresh_token: String,
    access_token_expires_at: DateTime<Utc>,
    scope: String,
    selected_profile_id: Option<Uuid>,
    last_refreshed_at: DateTime<Utc>,
}

impl From<OAuthTokenRow> for OAuthToken {
    fn from(row: OAuthTokenRow) -> Self {
        Self {
            account_id: AccountId::new(row.account_id),
            access_token: SecretString::from(row.access_token),
            refresh_token: SecretString::from(row.refresh_token),
            access_token_expires_at: row.access_token_expires_at,
            scope: row.scope,
            selected_profile_id: row.selected_profile_id.map(ProfileId),
            last_refreshed_at: row.last_refreshed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GameSessionRow {
    account_id: String,
    profile_id: Uuid,
    session_token: String,
    identity_token: String,
    expires_at: DateTime<Utc>,
}

impl From<GameSessionRow> for GameSession {
    fn from(row: GameSessionRow) -> Self {
        Self {
            account_id: AccountId::new(row.account_id),
            profile_id: ProfileId(row.profile_id),
            session_token: SecretString::from(row.session_token),
            identity_token: SecretString::from(row.identity_token),
            expires_at: row.expires_at,
        }
    }
}
