//! Rate-limit bucket sweeper.
//!
//! Buckets are created lazily per identifier, so without sweeping the maps grow
//! with every client address ever seen. Every `interval` the task drops buckets
//! idle longer than `idle_threshold` from each endpoint limiter.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered.

use crate::rate_limit::EndpointRateLimiters;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default sweep interval (5 minutes).
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

/// Default idle threshold (30 minutes).
const DEFAULT_IDLE_THRESHOLD_SECONDS: u64 = 1800;

#[derive(Debug, Clone, Copy)]
pub struct BucketSweeperConfig {
    pub interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for BucketSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECONDS),
        }
    }
}

/// Run the sweeper until `cancel_token` fires.
#[instrument(skip_all, name = "hytale_auth.task.bucket_sweeper")]
pub async fn start_bucket_sweeper(
    limiters: EndpointRateLimiters,
    config: BucketSweeperConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "hytale_auth.task.bucket_sweeper",
        interval_secs = config.interval.as_secs(),
        idle_threshold_secs = config.idle_threshold.as_secs(),
        "Starting rate-limit bucket sweeper"
    );

    let mut interval = tokio::time::interval(config.interval);
    // The first tick completes immediately; nothing is idle yet
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for limiter in limiters.all() {
                    let removed = limiter.sweep_idle(config.idle_threshold);
                    if removed > 0 {
                        debug!(
                            target: "hytale_auth.task.bucket_sweeper",
                            limiter = limiter.name(),
                            removed = removed,
                            remaining = limiter.bucket_count(),
                            "Swept idle rate-limit buckets"
                        );
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "hytale_auth.task.bucket_sweeper",
                    "Bucket sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;

    #[test]
    fn test_default_config() {
        let config = BucketSweeperConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.idle_threshold, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_sweeper_removes_idle_buckets_and_stops_on_cancel() {
        let limiters = EndpointRateLimiters::from_settings(&RateLimitSettings::default());
        limiters.device_code.check("10.0.0.1");
        limiters.sessions.check("account:acct-1");

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(start_bucket_sweeper(
            limiters.clone(),
            BucketSweeperConfig {
                interval: Duration::from_millis(20),
                idle_threshold: Duration::from_millis(10),
            },
            cancel_token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiters.device_code.bucket_count(), 0);
        assert_eq!(limiters.sessions.bucket_count(), 0);

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .unwrap();
    }
}
