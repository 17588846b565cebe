//! Persistence seams for the session lifecycle.
//!
//! The session manager only sees these traits. `PgStore` backs them with
//! PostgreSQL; `InMemoryStore` is used when no database is configured and in
//! tests.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::errors::AuthError;
use crate::models::{AuditEntry, GameSession, OAuthToken};
use common::types::{AccountId, ProfileId};

/// One OAuth token row per account.
#[async_trait::async_trait]
pub trait OAuthTokenRepository: Send + Sync {
    async fn find_by_account(&self, account_id: &AccountId)
        -> Result<Option<OAuthToken>, AuthError>;

    /// Insert or replace the account's token row.
    async fn upsert(&self, token: &OAuthToken) -> Result<(), AuthError>;

    /// Overwrite the token columns of an existing row after a refresh.
    ///
    /// `selected_profile_id` is left as stored so a concurrent selection is
    /// not lost. Returns false when the account has no token row.
    async fn update_grant(&self, token: &OAuthToken) -> Result<bool, AuthError>;

    /// Returns false when the account has no token row.
    async fn set_selected_profile(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<bool, AuthError>;
}

/// One game session row per (account, profile).
#[async_trait::async_trait]
pub trait GameSessionRepository: Send + Sync {
    async fn find(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<Option<GameSession>, AuthError>;

    async fn upsert(&self, session: &GameSession) -> Result<(), AuthError>;

    /// Returns whether a row was removed.
    async fn delete(&self, account_id: &AccountId, profile_id: ProfileId)
        -> Result<bool, AuthError>;
}

/// Append-only audit log.
///
/// The in-memory implementation keeps only the most recent entries.
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuthError>;
}
