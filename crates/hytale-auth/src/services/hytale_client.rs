//! Hytale provider HTTP client.
//!
//! One method per provider call: device-code issuance, device-token polling,
//! refresh-token grant, profile listing and the three game-session calls. The
//! client never loops or sleeps; polling cadence belongs to the caller.
//!
//! # Security
//!
//! - Credentials are `SecretString` and only exposed when building the request
//! - All requests carry a timeout (default 30s)
//! - Non-2xx responses go through the [`ErrorClassifier`]; bodies are logged,
//!   never returned

use crate::config::{Config, HytaleEnvironment, DEFAULT_HTTP_TIMEOUT_SECONDS};
use crate::errors::AuthError;
use crate::models::{
    DeviceAuthorization, OAuthErrorBody, PollOutcome, ProfileList, SessionGrant, TokenGrant,
};
use crate::observability::metrics;
use crate::services::error_classifier::ErrorClassifier;
use chrono::Utc;
use common::secret::{bearer, ExposeSecret, SecretString};
use common::types::ProfileId;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

const DEVICE_AUTH_PATH: &str = "/oauth2/device/auth";
const TOKEN_PATH: &str = "/oauth2/token";
const PROFILES_PATH: &str = "/my-account/get-profiles";
const SESSION_NEW_PATH: &str = "/game-session/new";
const SESSION_REFRESH_PATH: &str = "/game-session/refresh";
const SESSION_PATH: &str = "/game-session";
const JWKS_PATH: &str = "/.well-known/jwks.json";

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Connect timeout for provider calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Provider base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HytaleEndpoints {
    pub oauth_base: String,
    pub account_base: String,
    pub sessions_base: String,
}

impl HytaleEndpoints {
    pub fn for_environment(environment: HytaleEnvironment) -> Self {
        let domain = environment.domain();
        Self {
            oauth_base: format!("https://oauth.accounts.{}", domain),
            account_base: format!("https://account-data.{}", domain),
            sessions_base: format!("https://sessions.{}", domain),
        }
    }

    /// Route every call to one base URL.
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self {
            oauth_base: base.clone(),
            account_base: base.clone(),
            sessions_base: base,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        match &config.base_url_override {
            Some(base) => Self::with_base_url(base),
            None => Self::for_environment(config.environment),
        }
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.sessions_base, JWKS_PATH)
    }
}

/// Provider operations used by the session manager.
#[async_trait::async_trait]
pub trait HytaleApi: Send + Sync {
    /// Start a device authorization.
    async fn request_device_code(&self) -> Result<DeviceAuthorization, AuthError>;

    /// Exchange a device code once.
    async fn poll_device_token(&self, device_code: &str) -> Result<PollOutcome, AuthError>;

    /// Redeem a refresh token.
    async fn refresh_token(&self, refresh_token: &SecretString) -> Result<TokenGrant, AuthError>;

    async fn get_profiles(&self, access_token: &SecretString) -> Result<ProfileList, AuthError>;

    async fn create_game_session(
        &self,
        access_token: &SecretString,
        profile_id: ProfileId,
    ) -> Result<SessionGrant, AuthError>;

    async fn refresh_game_session(
        &self,
        session_token: &SecretString,
    ) -> Result<SessionGrant, AuthError>;

    async fn terminate_game_session(&self, session_token: &SecretString) -> Result<(), AuthError>;
}

/// reqwest-backed [`HytaleApi`].
#[derive(Clone)]
pub struct HytaleClient {
    client: Client,
    endpoints: HytaleEndpoints,
    client_id: String,
    scope: String,
    classifier: ErrorClassifier,
}

impl HytaleClient {
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the HTTP client cannot be built.
    pub fn new(
        endpoints: HytaleEndpoints,
        client_id: String,
        scope: String,
        classifier: ErrorClassifier,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                error!(target: "hytale_auth.client", error = %e, "Failed to build HTTP client");
                AuthError::Internal
            })?;

        Ok(Self {
            client,
            endpoints,
            client_id,
            scope,
            classifier,
        })
    }

    /// Client with default timeout and scope, for tests and tooling.
    pub fn with_defaults(endpoints: HytaleEndpoints, client_id: &str) -> Result<Self, AuthError> {
        Self::new(
            endpoints,
            client_id.to_string(),
            crate::config::DEFAULT_OAUTH_SCOPE.to_string(),
            ErrorClassifier::default(),
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
        )
    }

    pub fn endpoints(&self) -> &HytaleEndpoints {
        &self.endpoints
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, AuthError> {
        request.send().await.map_err(|e| {
            warn!(target: "hytale_auth.client", url = %url, error = %e, "Provider request failed");
            AuthError::Upstream(self.classifier.transport_failure(url, &e.to_string()))
        })
    }

    /// Decode a 2xx body as `T`, or classify the failure.
    async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
        url: &str,
    ) -> Result<T, AuthError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                error!(target: "hytale_auth.client", url = %url, error = %e, "Failed to parse provider response");
                AuthError::Upstream(self.classifier.malformed_response(url, &e.to_string()))
            });
        }
        Err(self.failure(response, url).await)
    }

    /// Reject a grant whose `expires_in` cannot become an expiry timestamp.
    fn checked_grant(&self, grant: TokenGrant, url: &str) -> Result<TokenGrant, AuthError> {
        match grant.expires_at(Utc::now()) {
            Ok(_) => Ok(grant),
            Err(e) => {
                error!(target: "hytale_auth.client", url = %url, error = %e, "Provider returned an unusable token lifetime");
                Err(AuthError::Upstream(
                    self.classifier.malformed_response(url, &e.to_string()),
                ))
            }
        }
    }

    async fn failure(&self, response: Response, url: &str) -> AuthError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let failure = self.classifier.classify(status, &body, url);
        warn!(
            target: "hytale_auth.client",
            status = status,
            code = failure.code.as_str(),
            detail = %failure.internal_detail,
            "Provider returned error"
        );
        AuthError::Upstream(failure)
    }
}

fn observe<T>(operation: &str, start: Instant, result: &Result<T, AuthError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.code(),
    };
    metrics::record_upstream_call(operation, outcome, start.elapsed());
}

#[async_trait::async_trait]
impl HytaleApi for HytaleClient {
    #[instrument(skip_all)]
    async fn request_device_code(&self) -> Result<DeviceAuthorization, AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.oauth_base, DEVICE_AUTH_PATH);

        let result = async {
            let request = self.client.post(&url).form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
            ]);
            let response = self.send(request, &url).await?;
            self.read_json::<DeviceAuthorization>(response, &url).await
        }
        .await;

        observe("request_device_code", start, &result);
        result
    }

    #[instrument(skip_all)]
    async fn poll_device_token(&self, device_code: &str) -> Result<PollOutcome, AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.oauth_base, TOKEN_PATH);

        let result = async {
            let request = self.client.post(&url).form(&[
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ("device_code", device_code),
                ("client_id", self.client_id.as_str()),
            ]);
            let response = self.send(request, &url).await?;

            if response.status().is_success() {
                let grant = self.read_json::<TokenGrant>(response, &url).await?;
                return self
                    .checked_grant(grant, &url)
                    .map(PollOutcome::Authorized);
            }

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(oauth) => match oauth.error.as_str() {
                    "authorization_pending" => Ok(PollOutcome::Pending { slow_down: false }),
                    "slow_down" => Ok(PollOutcome::Pending { slow_down: true }),
                    _ => {
                        warn!(
                            target: "hytale_auth.client",
                            oauth_error = %oauth.error,
                            "Device authorization ended with error"
                        );
                        Err(AuthError::DeviceAuthorization {
                            error: oauth.error,
                            description: oauth.error_description,
                        })
                    }
                },
                Err(_) => Err(AuthError::Upstream(
                    self.classifier.classify(status, &body, &url),
                )),
            }
        }
        .await;

        let outcome = match &result {
            Ok(PollOutcome::Pending { .. }) => "pending",
            Ok(PollOutcome::Authorized(_)) => "success",
            Err(e) => e.code(),
        };
        metrics::record_upstream_call("poll_device_token", outcome, start.elapsed());
        result
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, refresh_token: &SecretString) -> Result<TokenGrant, AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.oauth_base, TOKEN_PATH);

        let result = async {
            let request = self.client.post(&url).form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", self.client_id.as_str()),
            ]);
            let response = self.send(request, &url).await?;

            if response.status().is_success() {
                let grant = self.read_json::<TokenGrant>(response, &url).await?;
                return self.checked_grant(grant, &url);
            }

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            // A revoked or expired refresh token means a new device flow
            if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(&body) {
                if oauth.error == "invalid_grant" {
                    warn!(target: "hytale_auth.client", "Refresh token rejected by provider");
                    return Err(AuthError::ReauthorizationRequired);
                }
            }
            Err(AuthError::Upstream(
                self.classifier.classify(status, &body, &url),
            ))
        }
        .await;

        observe("refresh_token", start, &result);
        result
    }

    #[instrument(skip_all)]
    async fn get_profiles(&self, access_token: &SecretString) -> Result<ProfileList, AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.account_base, PROFILES_PATH);

        let result = async {
            let request = self
                .client
                .get(&url)
                .header("Authorization", bearer(access_token));
            let response = self.send(request, &url).await?;
            self.read_json::<ProfileList>(response, &url).await
        }
        .await;

        observe("get_profiles", start, &result);
        result
    }

    #[instrument(skip_all, fields(profile_id = %profile_id))]
    async fn create_game_session(
        &self,
        access_token: &SecretString,
        profile_id: ProfileId,
    ) -> Result<SessionGrant, AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.sessions_base, SESSION_NEW_PATH);

        let result = async {
            let request = self
                .client
                .post(&url)
                .header("Authorization", bearer(access_token))
                .json(&json!({ "uuid": profile_id }));
            let response = self.send(request, &url).await?;
            self.read_json::<SessionGrant>(response, &url).await
        }
        .await;

        observe("create_game_session", start, &result);
        result
    }

    #[instrument(skip_all)]
    async fn refresh_game_session(
        &self,
        session_token: &SecretString,
    ) -> Result<SessionGrant, AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.sessions_base, SESSION_REFRESH_PATH);

        let result = async {
            let request = self
                .client
                .post(&url)
                .header("Authorization", bearer(session_token));
            let response = self.send(request, &url).await?;
            self.read_json::<SessionGrant>(response, &url).await
        }
        .await;

        observe("refresh_game_session", start, &result);
        result
    }

    #[instrument(skip_all)]
    async fn terminate_game_session(&self, session_token: &SecretString) -> Result<(), AuthError> {
        let start = Instant::now();
        let url = format!("{}{}", self.endpoints.sessions_base, SESSION_PATH);

        let result = async {
            let request = self
                .client
                .delete(&url)
                .header("Authorization", bearer(session_token));
            let response = self.send(request, &url).await?;
            if response.status().is_success() {
                return Ok(());
            }
            Err(self.failure(response, &url).await)
        }
        .await;

        observe("terminate_game_session", start, &result);
        result
    }
}

/// Mock provider for unit tests of code built on [`HytaleApi`].
pub mod mock {
    use super::*;
    use crate::services::error_classifier::UpstreamFailure;
    use chrono::{DateTime, Utc};
    use common::types::AccountId;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider responses.
    ///
    /// Poll outcomes are consumed in order; once the script is empty polls
    /// return `Pending`. Every call increments `call_count`.
    pub struct MockHytaleApi {
        pub profiles: Mutex<ProfileList>,
        poll_script: Mutex<VecDeque<Result<PollOutcome, AuthError>>>,
        pub access_token: String,
        pub refresh_token: Option<String>,
        pub expires_in: i64,
        pub session_expires_at: DateTime<Utc>,
        /// Returned from every game-session call when set.
        pub session_failure: Mutex<Option<UpstreamFailure>>,
        /// Returned from `terminate_game_session` when set.
        pub terminate_failure: Mutex<Option<UpstreamFailure>>,
        call_count: AtomicUsize,
        session_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    impl MockHytaleApi {
        pub fn new(owner: &str, profiles: Vec<crate::models::GameProfile>) -> Self {
            Self {
                profiles: Mutex::new(ProfileList {
                    owner: AccountId::new(owner),
                    profiles,
                }),
                poll_script: Mutex::new(VecDeque::new()),
                access_token: "mock-access-token".to_string(),
                refresh_token: Some("mock-refresh-token".to_string()),
                expires_in: 3600,
                session_expires_at: Utc::now() + chrono::Duration::hours(1),
                session_failure: Mutex::new(None),
                terminate_failure: Mutex::new(None),
                call_count: AtomicUsize::new(0),
                session_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
            }
        }

        pub fn push_poll(&self, outcome: Result<PollOutcome, AuthError>) {
            if let Ok(mut script) = self.poll_script.lock() {
                script.push_back(outcome);
            }
        }

        pub fn grant(&self) -> TokenGrant {
            TokenGrant {
                access_token: SecretString::from(self.access_token.clone()),
                refresh_token: self.refresh_token.clone().map(SecretString::from),
                expires_in: self.expires_in,
                scope: "openid offline".to_string(),
                token_type: Some("Bearer".to_string()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Game-session create/refresh/terminate calls only.
        pub fn session_calls(&self) -> usize {
            self.session_calls.load(Ordering::SeqCst)
        }

        pub fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        fn session_grant(&self) -> Result<SessionGrant, AuthError> {
            self.session_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(failure) = self.session_failure.lock().ok().and_then(|f| f.clone()) {
                return Err(AuthError::Upstream(failure));
            }
            Ok(SessionGrant {
                session_token: SecretString::from("mock-session-token"),
                identity_token: SecretString::from("mock-identity-token"),
                expires_at: self.session_expires_at,
            })
        }
    }

    #[async_trait::async_trait]
    impl HytaleApi for MockHytaleApi {
        async fn request_device_code(&self) -> Result<DeviceAuthorization, AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(DeviceAuthorization {
                device_code: "mock-device-code".to_string(),
                user_code: "ABCD-EFGH".to_string(),
                verification_uri: "https://accounts.hytale.com/device".to_string(),
                verification_uri_complete: Some(
                    "https://accounts.hytale.com/device?user_code=ABCD-EFGH".to_string(),
                ),
                expires_in: 900,
                interval: 5,
            })
        }

        async fn poll_device_token(&self, _device_code: &str) -> Result<PollOutcome, AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.poll_script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or(Ok(PollOutcome::Pending { slow_down: false }))
        }

        async fn refresh_token(
            &self,
            _refresh_token: &SecretString,
        ) -> Result<TokenGrant, AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.grant())
        }

        async fn get_profiles(
            &self,
            _access_token: &SecretString,
        ) -> Result<ProfileList, AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.profiles
                .lock()
                .map(|p| p.clone())
                .map_err(|_| AuthError::Internal)
        }

        async fn create_game_session(
            &self,
            _access_token: &SecretString,
            _profile_id: ProfileId,
        ) -> Result<SessionGrant, AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.session_grant()
        }

        async fn refresh_game_session(
            &self,
            _session_token: &SecretString,
        ) -> Result<SessionGrant, AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.session_grant()
        }

        async fn terminate_game_session(
            &self,
            _session_token: &SecretString,
        ) -> Result<(), AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.session_calls.fetch_add(1, Ordering::SeqCst);
            match self.terminate_failure.lock().ok().and_then(|f| f.clone()) {
                Some(failure) => Err(AuthError::Upstream(failure)),
                None => Ok(()),
            }
        }
    }
}
