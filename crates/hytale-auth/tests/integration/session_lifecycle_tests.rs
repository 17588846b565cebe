//! Game session lifecycle against a mocked provider.

use crate::support::{config_for, link_account, manager_for};
use common::secret::ExposeSecret;
use common::types::ProfileId;
use hytale_auth::errors::AuthError;
use hytale_auth::repositories::GameSessionRepository;
use hytale_auth::services::UpstreamErrorCode;
use hytale_auth::state::AuthComponents;
use hytale_auth_test_utils::{MockHytaleProvider, SESSION_NEW_PATH, SESSION_PATH};
use uuid::Uuid;

#[tokio::test]
async fn test_create_refresh_terminate() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let profile = Uuid::new_v4();
    provider.mount_profiles("AT1", "acct-1", &[(profile, "Steve")]).await;
    provider.mount_session_new("session-1", "identity-1").await;
    provider.mount_session_refresh("session-1", "session-2").await;
    provider.mount_session_delete(204).await;
    let (manager, store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let created = manager.create_game_session(&linked.account_id, None).await?;
    assert_eq!(created.profile_id, ProfileId(profile));
    assert_eq!(created.session_token.expose_secret(), "session-1");
    assert_eq!(created.identity_token.expose_secret(), "identity-1");

    let refreshed = manager
        .refresh_game_session(&linked.account_id, ProfileId(profile))
        .await?;
    assert_eq!(refreshed.session_token.expose_secret(), "session-2");
    assert!(refreshed.expires_at > created.expires_at);

    let stored = store
        .find(&linked.account_id, ProfileId(profile))
        .await?
        .expect("session should be stored");
    assert_eq!(stored.session_token.expose_secret(), "session-2");

    manager
        .terminate_game_session(&linked.account_id, ProfileId(profile))
        .await?;
    assert_eq!(store.session_count(), 0);
    assert!(manager
        .get_game_session(&linked.account_id, ProfileId(profile))
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_session_limit_is_classified_and_not_persisted() {
    let provider = MockHytaleProvider::start().await;
    provider
        .mount_profiles("AT1", "acct-1", &[(Uuid::new_v4(), "Steve")])
        .await;
    provider
        .mount_session_new_error(403, "Too many sessions for this account")
        .await;
    let (manager, store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let err = manager
        .create_game_session(&linked.account_id, None)
        .await
        .unwrap_err();

    let failure = err.upstream().expect("provider failure");
    assert!(failure.is_session_limit());
    assert_eq!(failure.code, UpstreamErrorCode::SessionLimitExceeded);
    assert_eq!(err.status_code(), 403);
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn test_plain_forbidden_is_not_session_limit() {
    let provider = MockHytaleProvider::start().await;
    provider
        .mount_profiles("AT1", "acct-1", &[(Uuid::new_v4(), "Steve")])
        .await;
    provider.mount_session_new_error(403, "forbidden").await;
    let (manager, _store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let err = manager
        .create_game_session(&linked.account_id, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn test_provider_500_surfaces_as_502() {
    let provider = MockHytaleProvider::start().await;
    provider
        .mount_profiles("AT1", "acct-1", &[(Uuid::new_v4(), "Steve")])
        .await;
    provider.mount_session_new_error(500, "stack trace").await;
    let (manager, _store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let err = manager
        .create_game_session(&linked.account_id, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "HYTALE_SERVER_ERROR");
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn test_no_profile_selected_makes_no_session_call() {
    let provider = MockHytaleProvider::start().await;
    provider
        .mount_profiles("AT1", "acct-1", &[(Uuid::new_v4(), "Alex"), (Uuid::new_v4(), "Steve")])
        .await;
    provider.mount_session_new("session-1", "identity-1").await;
    let (manager, _store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let result = manager.create_game_session(&linked.account_id, None).await;

    assert!(matches!(result, Err(AuthError::NoProfileSelected)));
    assert_eq!(provider.request_count(SESSION_NEW_PATH).await, 0);
}

#[tokio::test]
async fn test_selected_profile_is_used_by_default() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let steve = Uuid::new_v4();
    provider
        .mount_profiles("AT1", "acct-1", &[(Uuid::new_v4(), "Alex"), (steve, "Steve")])
        .await;
    provider.mount_session_new("session-1", "identity-1").await;
    let (manager, _store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let selected = manager
        .select_profile(&linked.account_id, ProfileId(steve))
        .await?;
    assert_eq!(selected.username, "Steve");

    let session = manager.create_game_session(&linked.account_id, None).await?;
    assert_eq!(session.profile_id, ProfileId(steve));
    Ok(())
}

#[tokio::test]
async fn test_terminate_after_provider_expiry_still_cleans_up() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let profile = Uuid::new_v4();
    provider.mount_profiles("AT1", "acct-1", &[(profile, "Steve")]).await;
    provider.mount_session_new("session-1", "identity-1").await;
    provider.mount_session_delete(404).await;
    let (manager, store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;
    manager.create_game_session(&linked.account_id, None).await?;

    manager
        .terminate_game_session(&linked.account_id, ProfileId(profile))
        .await?;

    assert_eq!(store.session_count(), 0);
    assert_eq!(provider.request_count(SESSION_PATH).await, 1);
    Ok(())
}

#[tokio::test]
async fn test_refresh_without_session() {
    let provider = MockHytaleProvider::start().await;
    provider.mount_profiles("AT1", "acct-1", &[]).await;
    let (manager, _store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let result = manager
        .refresh_game_session(&linked.account_id, ProfileId(Uuid::new_v4()))
        .await;

    assert!(matches!(result, Err(AuthError::SessionNotFound)));
}

#[tokio::test]
async fn test_components_from_config_drive_the_flow() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let profile = Uuid::new_v4();
    provider.mount_profiles("AT1", "acct-1", &[(profile, "Steve")]).await;
    provider.mount_session_new("session-1", "identity-1").await;
    let components = AuthComponents::from_config(&config_for(&provider))?;

    let linked = link_account(&provider, &components.sessions, "AT1").await;
    let session = components
        .sessions
        .create_game_session(&linked.account_id, None)
        .await?;

    assert_eq!(session.profile_id, ProfileId(profile));
    assert_eq!(components.jwks.jwks_url(), provider.jwks_url());
    Ok(())
}
