//! JWKS cache behaviour against a live (mocked) key endpoint.

use common::jwt::DEFAULT_CLOCK_SKEW;
use hytale_auth::auth::{JwksCache, JwksError, TokenRejection, TokenValidator};
use hytale_auth_test_utils::{MockHytaleProvider, TestClaimsBuilder, TestKeypair, JWKS_PATH};
use std::sync::Arc;

/// A refresh replaces the whole key set; keys missing from it are gone.
#[tokio::test]
async fn test_refresh_fully_replaces_key_set() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let old_key = TestKeypair::new(1, "key-old");
    let other_key = TestKeypair::new(2, "key-other");
    let new_key = TestKeypair::new(3, "key-new");
    provider.mount_jwks_limited(&[&old_key, &other_key], 1).await;
    provider.mount_jwks(&[&new_key]).await;

    let cache = JwksCache::new(provider.jwks_url());
    cache.get_key("key-old").await?;
    assert_eq!(cache.key_count().await, 2);

    assert_eq!(cache.force_refresh().await?, 1);

    assert!(cache.get_key("key-new").await.is_ok());
    assert!(matches!(
        cache.get_key("key-other").await,
        Err(JwksError::KeyNotFound(_))
    ));
    Ok(())
}

/// A rotated-in key is picked up by the kid-miss refresh without waiting for expiry.
#[tokio::test]
async fn test_rotated_key_validates_after_kid_miss() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let first = TestKeypair::new(1, "key-1");
    let second = TestKeypair::new(2, "key-2");
    provider.mount_jwks_limited(&[&first], 1).await;
    provider.mount_jwks(&[&first, &second]).await;

    let validator = TokenValidator::new(
        Arc::new(JwksCache::new(provider.jwks_url())),
        DEFAULT_CLOCK_SKEW,
    );

    let old = first.sign_claims(&TestClaimsBuilder::new().build());
    validator.validate(&old, None).await?;

    let rotated = second.sign_claims(&TestClaimsBuilder::new().for_subject("acct-2").build());
    let claims = validator.validate(&rotated, None).await?;

    assert_eq!(claims.subject, "acct-2");
    assert_eq!(provider.request_count(JWKS_PATH).await, 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_rejects_unknown_kid() {
    let provider = MockHytaleProvider::start().await;
    let key = TestKeypair::new(1, "key-1");
    provider.mount_jwks_limited(&[&key], 1).await;

    let validator = TokenValidator::new(
        Arc::new(JwksCache::new(provider.jwks_url())),
        DEFAULT_CLOCK_SKEW,
    );
    assert!(validator
        .validate(&key.sign_claims(&TestClaimsBuilder::new().build()), None)
        .await
        .is_ok());

    // Endpoint now answers 404; a kid miss cannot be resolved
    let stranger = TestKeypair::new(2, "key-2");
    let result = validator
        .validate(&stranger.sign_claims(&TestClaimsBuilder::new().build()), None)
        .await;

    assert_eq!(result.unwrap_err(), TokenRejection::KeysUnavailable);
}
