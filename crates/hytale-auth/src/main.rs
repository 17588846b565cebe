//! hytale-login
//!
//! Links a Hytale account from the terminal with the device authorization
//! grant, then opens a game session for the selected profile.

use hytale_auth::config::Config;
use hytale_auth::errors::AuthError;
use hytale_auth::models::{DeviceAuthorization, DeviceFlowStatus, OAuthToken};
use hytale_auth::observability::init_tracing;
use hytale_auth::services::{with_cancellation, SessionManager};
use hytale_auth::state::AuthComponents;
use std::time::Duration;
use tokio::signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Added to the poll interval each time the provider answers `slow_down`.
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_tracing(json_logs);

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        environment = ?config.environment,
        persistent = config.database_url.is_some(),
        "Configuration loaded successfully"
    );

    let components = AuthComponents::from_config(&config).map_err(|e| {
        error!("Failed to initialize auth components: {}", e);
        e
    })?;

    let cancel_token = CancellationToken::new();
    let signal_token = cancel_token.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, cancelling login"),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
        signal_token.cancel();
    });

    let manager = &components.sessions;

    let authorization =
        with_cancellation(&cancel_token, manager.start_device_authorization()).await?;

    println!();
    println!("To link your Hytale account, visit:");
    println!("    {}", authorization.verification_uri);
    println!("and enter the code: {}", authorization.user_code);
    if let Some(complete) = &authorization.verification_uri_complete {
        println!("or open: {}", complete);
    }
    println!();

    let token = poll_until_linked(manager, &authorization, &cancel_token).await?;
    println!("Linked Hytale account {}", token.account_id);

    let profiles =
        with_cancellation(&cancel_token, manager.list_profiles(&token.account_id)).await?;
    for profile in &profiles.profiles {
        let marker = if Some(profile.uuid) == token.selected_profile_id {
            "*"
        } else {
            " "
        };
        println!(" {} {} ({})", marker, profile.username, profile.uuid);
    }

    match token.selected_profile_id {
        Some(_) => {
            let session = with_cancellation(
                &cancel_token,
                manager.create_game_session(&token.account_id, None),
            )
            .await?;
            println!(
                "Game session ready for profile {} until {}",
                session.profile_id, session.expires_at
            );
        }
        None => {
            println!("Select a profile before creating a game session.");
        }
    }

    Ok(())
}

/// Poll at the issued interval until the account is linked or the code expires.
async fn poll_until_linked(
    manager: &SessionManager,
    authorization: &DeviceAuthorization,
    cancel_token: &CancellationToken,
) -> Result<OAuthToken, AuthError> {
    let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
    let mut interval = Duration::from_secs(authorization.interval.max(1));

    loop {
        if Instant::now() + interval > deadline {
            warn!("Device code expired before authorization completed");
            return Err(AuthError::DeviceAuthorization {
                error: "expired_token".to_string(),
                description: None,
            });
        }

        with_cancellation(cancel_token, async {
            tokio::time::sleep(interval).await;
            Ok(())
        })
        .await?;

        let status = with_cancellation(
            cancel_token,
            manager.complete_device_authorization(&authorization.device_code),
        )
        .await?;

        match status {
            DeviceFlowStatus::Linked(token) => return Ok(token),
            DeviceFlowStatus::Pending { slow_down: true } => {
                interval += SLOW_DOWN_INCREMENT;
                info!(interval_secs = interval.as_secs(), "Provider asked to slow down");
            }
            DeviceFlowStatus::Pending { slow_down: false } => {}
        }
    }
}
