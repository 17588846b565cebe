//! In-memory repositories.

use crate::errors::AuthError;
use crate::models::{AuditEntry, GameSession, OAuthToken};
use crate::repositories::{AuditLog, GameSessionRepository, OAuthTokenRepository};
use common::types::{AccountId, ProfileId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Audit entries retained by [`InMemoryStore::new`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Implements all three repository traits over process memory.
///
/// The audit log is a ring buffer: once full, the oldest entry is dropped
/// for each append.
pub struct InMemoryStore {
    tokens: Mutex<HashMap<AccountId, OAuthToken>>,
    sessions: Mutex<HashMap<(AccountId, ProfileId), GameSession>>,
    audit: Mutex<VecDeque<AuditEntry>>,
    audit_capacity: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_audit_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of zero is raised to one.
    pub fn with_audit_capacity(audit_capacity: usize) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            audit: Mutex::new(VecDeque::new()),
            audit_capacity: audit_capacity.max(1),
        }
    }

    pub fn token_count(&self) -> usize {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the retained audit entries, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl OAuthTokenRepository for InMemoryStore {
    async fn find_by_account(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<OAuthToken>, AuthError> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned())
    }

    async fn upsert(&self, token: &OAuthToken) -> Result<(), AuthError> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.account_id.clone(), token.clone());
        Ok(())
    }

    async fn update_grant(&self, token: &OAuthToken) -> Result<bool, AuthError> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = tokens.get_mut(&token.account_id) else {
            return Ok(false);
        };
        stored.access_token = token.access_token.clone();
        stored.refresh_token = token.refresh_token.clone();
        stored.access_token_expires_at = token.access_token_expires_at;
        stored.scope = token.scope.clone();
        stored.last_refreshed_at = token.last_refreshed_at;
        Ok(true)
    }

    async fn set_selected_profile(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<bool, AuthError> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        match tokens.get_mut(account_id) {
            Some(token) => {
                token.selected_profile_id = Some(profile_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl GameSessionRepository for InMemoryStore {
    async fn find(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<Option<GameSession>, AuthError> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(account_id.clone(), profile_id))
            .cloned())
    }

    async fn upsert(&self, session: &GameSession) -> Result<(), AuthError> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (session.account_id.clone(), session.profile_id),
                session.clone(),
            );
        Ok(())
    }

    async fn delete(
        &self,
        account_id: &AccountId,
        profile_id: ProfileId,
    ) -> Result<bool, AuthError> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(account_id.clone(), profile_id))
            .is_some())
    }
}

#[async_trait::async_trait]
impl AuditLog for InMemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuthError> {
        let mut audit = self.audit.lock().unwrap_or_else(PoisonError::into_inner);
        while audit.len() >= self.audit_capacity {
            audit.pop_front();
        }
        audit.push_back(entry.clone());
        Ok(())
    }
}
