//! Shared wiring for integration tests.

use hytale_auth::config::Config;
use hytale_auth::models::{DeviceFlowStatus, OAuthToken};
use hytale_auth::repositories::InMemoryStore;
use hytale_auth::services::{HytaleClient, HytaleEndpoints, SessionManager};
use hytale_auth_test_utils::MockHytaleProvider;
use std::collections::HashMap;
use std::sync::Arc;

pub const CLIENT_ID: &str = "hytale-server";

/// Configuration routing every provider call to `provider`.
pub fn config_for(provider: &MockHytaleProvider) -> Config {
    let vars = HashMap::from([
        ("HYTALE_CLIENT_ID".to_string(), CLIENT_ID.to_string()),
        ("HYTALE_BASE_URL_OVERRIDE".to_string(), provider.uri()),
        ("HYTALE_HTTP_TIMEOUT_SECONDS".to_string(), "5".to_string()),
    ]);
    Config::from_vars(&vars).expect("Config should load successfully")
}

/// A session manager over the real HTTP client and an in-memory store.
pub fn manager_for(provider: &MockHytaleProvider) -> (SessionManager, Arc<InMemoryStore>) {
    let client = HytaleClient::with_defaults(HytaleEndpoints::with_base_url(&provider.uri()), CLIENT_ID)
        .expect("client should build");
    let store = Arc::new(InMemoryStore::new());
    let manager = SessionManager::new(Arc::new(client), store.clone(), store.clone(), store.clone());
    (manager, store)
}

/// Run the device flow against a provider that authorizes immediately.
pub async fn link_account(
    provider: &MockHytaleProvider,
    manager: &SessionManager,
    access_token: &str,
) -> OAuthToken {
    provider
        .mount_token_success(access_token, Some("refresh-1"), 3600)
        .await;
    match manager.complete_device_authorization("device-1").await.unwrap() {
        DeviceFlowStatus::Linked(token) => Some(token),
        DeviceFlowStatus::Pending { .. } => None,
    }
    .expect("provider authorizes immediately")
}
