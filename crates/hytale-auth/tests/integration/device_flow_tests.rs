//! Device authorization flow against a mocked provider.

use crate::support::{link_account, manager_for};
use chrono::{Duration, Utc};
use common::secret::ExposeSecret;
use common::types::AccountId;
use hytale_auth::errors::AuthError;
use hytale_auth::models::{AuditAction, DeviceFlowStatus};
use hytale_auth::repositories::OAuthTokenRepository;
use hytale_auth_test_utils::{MockHytaleProvider, DEVICE_AUTH_PATH, PROFILES_PATH, TOKEN_PATH};
use uuid::Uuid;

#[tokio::test]
async fn test_start_device_authorization_returns_user_code() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    provider.mount_device_code("device-1", "WDJB-MJHT", 5).await;
    let (manager, store) = manager_for(&provider);

    let authorization = manager.start_device_authorization().await?;

    assert_eq!(authorization.device_code, "device-1");
    assert_eq!(authorization.user_code, "WDJB-MJHT");
    assert_eq!(authorization.interval, 5);
    assert_eq!(provider.request_count(DEVICE_AUTH_PATH).await, 1);

    let entries = store.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries.first().unwrap().action, AuditAction::DeviceCodeIssued);
    Ok(())
}

/// Pending three times, then AT1/RT1/3600: exactly one token row with AT1.
#[tokio::test]
async fn test_pending_three_times_then_success_persists_token() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let profile = Uuid::new_v4();
    provider.mount_token_pending(3).await;
    provider.mount_token_success("AT1", Some("RT1"), 3600).await;
    provider.mount_profiles("AT1", "acct-1", &[(profile, "Steve")]).await;
    let (manager, store) = manager_for(&provider);

    for _ in 0..3 {
        let status = manager.complete_device_authorization("device-1").await?;
        assert!(matches!(status, DeviceFlowStatus::Pending { slow_down: false }));
        assert_eq!(store.token_count(), 0);
    }

    let status = manager.complete_device_authorization("device-1").await?;
    assert!(matches!(status, DeviceFlowStatus::Linked(_)));

    assert_eq!(store.token_count(), 1);
    let token = store
        .find_by_account(&AccountId::new("acct-1"))
        .await?
        .expect("token should be persisted");
    assert_eq!(token.access_token.expose_secret(), "AT1");
    assert_eq!(token.refresh_token.expose_secret(), "RT1");

    let expected = Utc::now() + Duration::seconds(3600);
    let drift = (token.access_token_expires_at - expected).num_seconds().abs();
    assert!(drift <= 5, "expiry should be about now + 3600s, drift {}s", drift);

    // Sole profile is selected automatically
    assert_eq!(token.selected_profile_id.map(|p| p.0), Some(profile));
    assert_eq!(provider.request_count(TOKEN_PATH).await, 4);
    Ok(())
}

#[tokio::test]
async fn test_slow_down_is_pending_with_flag() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    provider.mount_token_slow_down(1).await;
    provider.mount_token_pending(1).await;
    let (manager, _store) = manager_for(&provider);

    let first = manager.complete_device_authorization("device-1").await?;
    let second = manager.complete_device_authorization("device-1").await?;

    assert!(matches!(first, DeviceFlowStatus::Pending { slow_down: true }));
    assert!(matches!(second, DeviceFlowStatus::Pending { slow_down: false }));
    Ok(())
}

#[tokio::test]
async fn test_expired_device_code_is_terminal() {
    let provider = MockHytaleProvider::start().await;
    provider.mount_token_failure("expired_token").await;
    let (manager, store) = manager_for(&provider);

    let result = manager.complete_device_authorization("device-1").await;

    assert!(
        matches!(&result, Err(AuthError::DeviceAuthorization { error, .. }) if error == "expired_token"),
        "unexpected result: {:?}",
        result
    );
    assert_eq!(store.token_count(), 0);
    assert_eq!(provider.request_count(PROFILES_PATH).await, 0);
}

#[tokio::test]
async fn test_relinking_replaces_tokens_in_place() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    provider
        .mount_profiles("AT1", "acct-1", &[(Uuid::new_v4(), "Alex"), (Uuid::new_v4(), "Steve")])
        .await;
    let (manager, store) = manager_for(&provider);

    let first = link_account(&provider, &manager, "AT1").await;
    assert!(first.selected_profile_id.is_none());
    let second = link_account(&provider, &manager, "AT1").await;

    assert_eq!(first.account_id, second.account_id);
    assert_eq!(store.token_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_refresh_rotates_tokens() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    provider.mount_profiles("AT1", "acct-1", &[]).await;
    provider.mount_refresh_success("AT2", Some("RT2"), 7200).await;
    let (manager, store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let refreshed = manager.refresh_oauth_token(&linked.account_id).await?;

    assert_eq!(refreshed.access_token.expose_secret(), "AT2");
    let stored = store.find_by_account(&linked.account_id).await?.unwrap();
    assert_eq!(stored.access_token.expose_secret(), "AT2");
    assert_eq!(stored.refresh_token.expose_secret(), "RT2");
    Ok(())
}

#[tokio::test]
async fn test_revoked_refresh_token_requires_reauthorization() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    provider.mount_profiles("AT1", "acct-1", &[]).await;
    provider.mount_refresh_error(400, "invalid_grant").await;
    let (manager, store) = manager_for(&provider);
    let linked = link_account(&provider, &manager, "AT1").await;

    let result = manager.refresh_oauth_token(&linked.account_id).await;

    assert!(matches!(result, Err(AuthError::ReauthorizationRequired)));
    // Provider failure leaves the stored token untouched
    let stored = store.find_by_account(&linked.account_id).await?.unwrap();
    assert_eq!(stored.access_token.expose_secret(), "AT1");
    Ok(())
}

#[tokio::test]
async fn test_refresh_for_unlinked_account() {
    let provider = MockHytaleProvider::start().await;
    let (manager, _store) = manager_for(&provider);

    let result = manager.refresh_oauth_token(&AccountId::new("nobody")).await;

    assert!(matches!(result, Err(AuthError::AccountNotLinked)));
    assert_eq!(provider.request_count(TOKEN_PATH).await, 0);
}
