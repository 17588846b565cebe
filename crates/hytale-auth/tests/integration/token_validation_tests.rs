//! Session and identity token verification against a mocked JWKS endpoint.
//!
//! Every rejection case starts from an otherwise valid token so each check is
//! exercised on its own.

use crate::support::config_for;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use common::jwt::DEFAULT_CLOCK_SKEW;
use hytale_auth::auth::{JwksCache, TokenRejection, TokenValidator};
use hytale_auth::errors::AuthError;
use hytale_auth::state::AuthComponents;
use hytale_auth_test_utils::{MockHytaleProvider, TestClaimsBuilder, TestKeypair};
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    _provider: MockHytaleProvider,
    keypair: TestKeypair,
    validator: TokenValidator,
}

async fn fixture() -> Fixture {
    let provider = MockHytaleProvider::start().await;
    let keypair = TestKeypair::new(1, "session-key-1");
    provider.mount_jwks(&[&keypair]).await;

    let jwks = Arc::new(JwksCache::new(provider.jwks_url()));
    let validator = TokenValidator::new(jwks, DEFAULT_CLOCK_SKEW);

    Fixture {
        _provider: provider,
        keypair,
        validator,
    }
}

#[tokio::test]
async fn test_valid_session_token_signed_by_jsonwebtoken() -> Result<(), anyhow::Error> {
    let f = fixture().await;
    let token = f.keypair.sign_claims(
        &TestClaimsBuilder::new()
            .for_subject("acct-1")
            .with_audience("game-server")
            .with_claim("profile", json!("steve"))
            .build(),
    );

    let claims = f
        .validator
        .validate_session_token(&token, Some("game-server"))
        .await?;

    assert_eq!(claims.subject, "acct-1");
    assert!(claims.has_audience("game-server"));
    assert_eq!(claims.extra_claim("profile"), Some(&json!("steve")));
    Ok(())
}

#[tokio::test]
async fn test_identity_token_exposes_email() -> Result<(), anyhow::Error> {
    let f = fixture().await;
    let token = f.keypair.sign_claims(
        &TestClaimsBuilder::new()
            .for_subject("acct-1")
            .with_email("player@example.com", true)
            .build(),
    );

    let identity = f.validator.validate_identity_token(&token, None).await?;

    assert_eq!(identity.claims.subject, "acct-1");
    assert_eq!(identity.email.as_deref(), Some("player@example.com"));
    assert!(identity.email_verified);
    assert!(identity.claims.extra_claim("email").is_none());
    Ok(())
}

#[tokio::test]
async fn test_rejects_non_eddsa_algorithm() {
    let f = fixture().await;
    let header = json!({"alg": "HS256", "typ": "JWT", "kid": "session-key-1"});
    let token = f
        .keypair
        .sign_with_header(&header, &TestClaimsBuilder::new().build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::UnsupportedAlgorithm);
}

#[tokio::test]
async fn test_rejects_missing_kid() {
    let f = fixture().await;
    let token = f
        .keypair
        .sign_with_header(&json!({"alg": "EdDSA"}), &TestClaimsBuilder::new().build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::MissingKeyId);
}

#[tokio::test]
async fn test_rejects_unknown_kid() {
    let f = fixture().await;
    let stranger = TestKeypair::new(2, "not-published");
    let token = stranger.sign_claims(&TestClaimsBuilder::new().build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::UnknownKey);
}

#[tokio::test]
async fn test_rejects_tampered_payload() {
    let f = fixture().await;
    let token = f
        .keypair
        .sign_claims(&TestClaimsBuilder::new().for_subject("acct-1").build());

    let mut parts = token.split('.');
    let header = parts.next().unwrap();
    let _payload = parts.next().unwrap();
    let signature = parts.next().unwrap();
    let forged = URL_SAFE_NO_PAD.encode(
        TestClaimsBuilder::new()
            .for_subject("attacker")
            .build()
            .to_string(),
    );
    let tampered = format!("{}.{}.{}", header, forged, signature);

    let result = f.validator.validate(&tampered, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::BadSignature);
}

#[tokio::test]
async fn test_rejects_key_substitution() {
    let f = fixture().await;
    // Signed by a different key but claiming the published kid
    let impostor = TestKeypair::new(3, "session-key-1");
    let token = impostor.sign_claims(&TestClaimsBuilder::new().build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::BadSignature);
}

#[tokio::test]
async fn test_rejects_expired_token() {
    let f = fixture().await;
    let token = f
        .keypair
        .sign_claims(&TestClaimsBuilder::new().expires_in(-10).build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::Expired);
}

#[tokio::test]
async fn test_rejects_missing_expiry() {
    let f = fixture().await;
    let token = f
        .keypair
        .sign_with_header(&f.keypair.header_json(), &TestClaimsBuilder::new().without_expiry().build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::MissingExpiry);
}

#[tokio::test]
async fn test_iat_clock_skew() {
    let f = fixture().await;
    let now = Utc::now().timestamp();

    let within = f
        .keypair
        .sign_claims(&TestClaimsBuilder::new().issued_at(now + 30).build());
    assert!(f.validator.validate(&within, None).await.is_ok());

    let beyond = f
        .keypair
        .sign_claims(&TestClaimsBuilder::new().issued_at(now + 120).build());
    assert_eq!(
        f.validator.validate(&beyond, None).await.unwrap_err(),
        TokenRejection::IssuedInFuture
    );
}

#[tokio::test]
async fn test_rejects_missing_subject() {
    let f = fixture().await;
    let token = f
        .keypair
        .sign_claims(&TestClaimsBuilder::new().without_subject().build());

    let result = f.validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::MissingSubject);
}

#[tokio::test]
async fn test_audience_must_match_when_expected() {
    let f = fixture().await;
    let token = f
        .keypair
        .sign_claims(&TestClaimsBuilder::new().with_audience("launcher").build());

    assert_eq!(
        f.validator
            .validate(&token, Some("game-server"))
            .await
            .unwrap_err(),
        TokenRejection::AudienceMismatch
    );
    assert!(f.validator.validate(&token, None).await.is_ok());
}

#[tokio::test]
async fn test_configured_audience_is_enforced_by_default() -> Result<(), anyhow::Error> {
    let provider = MockHytaleProvider::start().await;
    let keypair = TestKeypair::new(1, "session-key-1");
    provider.mount_jwks(&[&keypair]).await;
    let mut config = config_for(&provider);
    config.expected_audience = Some("game-server".to_string());
    let components = AuthComponents::from_config(&config)?;
    let validator = &components.validator;

    let for_launcher = keypair.sign_claims(&TestClaimsBuilder::new().with_audience("launcher").build());
    let for_server = keypair.sign_claims(&TestClaimsBuilder::new().with_audience("game-server").build());

    assert_eq!(
        validator
            .validate_session_token(&for_launcher, None)
            .await
            .unwrap_err(),
        TokenRejection::AudienceMismatch
    );
    assert!(validator.validate_session_token(&for_server, None).await.is_ok());
    // An explicit audience takes precedence over the configured one
    assert!(validator
        .validate_session_token(&for_launcher, Some("launcher"))
        .await
        .is_ok());
    Ok(())
}

#[tokio::test]
async fn test_rejects_oversized_and_malformed_tokens() {
    let f = fixture().await;

    let oversized = "a".repeat(10_000);
    assert_eq!(
        f.validator.validate(&oversized, None).await.unwrap_err(),
        TokenRejection::TooLarge
    );
    assert_eq!(
        f.validator.validate("only.two", None).await.unwrap_err(),
        TokenRejection::Malformed
    );
}

#[tokio::test]
async fn test_keys_unavailable_fails_closed() {
    let provider = MockHytaleProvider::start().await;
    // Nothing mounted: the JWKS endpoint answers 404
    let validator = TokenValidator::new(
        Arc::new(JwksCache::new(provider.jwks_url())),
        DEFAULT_CLOCK_SKEW,
    );
    let token = TestKeypair::new(1, "session-key-1").sign_claims(&TestClaimsBuilder::new().build());

    let result = validator.validate(&token, None).await;

    assert_eq!(result.unwrap_err(), TokenRejection::KeysUnavailable);
}

#[tokio::test]
async fn test_rejections_share_one_client_message() {
    let messages: Vec<String> = [
        TokenRejection::BadSignature,
        TokenRejection::Expired,
        TokenRejection::UnknownKey,
    ]
    .into_iter()
    .map(|r| r.to_string())
    .collect();

    assert!(messages.iter().all(|m| m == "The token is invalid or expired"));
    assert_eq!(
        AuthError::InvalidToken(TokenRejection::BadSignature).code(),
        "INVALID_TOKEN"
    );
}
