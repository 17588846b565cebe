//! Token-bucket rate limiting.
//!
//! Each identifier (client address or account id) gets its own bucket with
//! `capacity = requests_per_window` and a refill rate of
//! `capacity / window` tokens per second. A request is admitted when at least
//! one whole token is available after refilling.
//!
//! The bucket map is behind one `std::sync::Mutex` held only for
//! lookup/insert; token math happens under the per-bucket lock. Buckets idle
//! for longer than the sweep threshold are dropped by
//! [`start_bucket_sweeper`](crate::tasks::start_bucket_sweeper).

use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// What a limiter keys its buckets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierStrategy {
    ClientAddress,
    AccountId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
    pub strategy: IdentifierStrategy,
}

impl RateLimitConfig {
    pub fn new(requests_per_window: u32, window: Duration, strategy: IdentifierStrategy) -> Self {
        Self {
            requests_per_window,
            window,
            strategy,
        }
    }

    fn capacity(&self) -> f64 {
        f64::from(self.requests_per_window.max(1))
    }

    fn refill_per_second(&self) -> f64 {
        let window = self.window.as_secs_f64();
        if window <= 0.0 {
            return self.capacity();
        }
        self.capacity() / window
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Whole tokens left after this request.
    pub remaining: u32,
    /// Time until the bucket is full again.
    pub reset_after: Duration,
    /// Set on rejection; equal to the configured window.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Reset estimate as a Unix timestamp in seconds.
    pub fn reset_at_unix(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now + self.reset_after).as_secs()
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_second()).min(config.capacity());
        self.last_refill = now;
    }
}

/// A named limiter for one endpoint class.
pub struct RateLimiter {
    name: &'static str,
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume one token for `identifier` if available.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, identifier: &str, now: Instant) -> RateLimitDecision {
        let capacity = self.config.capacity();

        let bucket = {
            let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                buckets
                    .entry(identifier.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::full(capacity, now)))),
            )
        };

        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(&self.config, now);
        bucket.last_seen = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        let refill_rate = self.config.refill_per_second();
        let reset_after = Duration::from_secs_f64(((capacity - bucket.tokens) / refill_rate).max(0.0));

        let decision = RateLimitDecision {
            allowed,
            limit: self.config.requests_per_window,
            remaining: whole_tokens(bucket.tokens),
            reset_after,
            retry_after: (!allowed).then_some(self.config.window),
        };
        drop(bucket);

        metrics::record_rate_limit_decision(self.name, allowed);
        if !allowed {
            tracing::debug!(
                target: "hytale_auth.rate_limit",
                limiter = self.name,
                "Request rejected by rate limiter"
            );
        }

        decision
    }

    /// Drop buckets not touched for `idle`. Returns how many were removed.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        self.sweep_idle_at(idle, Instant::now())
    }

    pub fn sweep_idle_at(&self, idle: Duration, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            now.saturating_duration_since(bucket.last_seen) <= idle
        });
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_tokens(tokens: f64) -> u32 {
    tokens.floor().max(0.0) as u32
}

/// One limiter per endpoint class.
#[derive(Clone)]
pub struct EndpointRateLimiters {
    pub device_code: Arc<RateLimiter>,
    pub token_poll: Arc<RateLimiter>,
    pub profiles: Arc<RateLimiter>,
    pub sessions: Arc<RateLimiter>,
}

impl EndpointRateLimiters {
    pub fn from_settings(settings: &crate::config::RateLimitSettings) -> Self {
        Self {
            device_code: Arc::new(RateLimiter::new("device_code", settings.device_code)),
            token_poll: Arc::new(RateLimiter::new("token_poll", settings.token_poll)),
            profiles: Arc::new(RateLimiter::new("profiles", settings.profiles)),
            sessions: Arc::new(RateLimiter::new("sessions", settings.sessions)),
        }
    }

    pub fn all(&self) -> [&Arc<RateLimiter>; 4] {
        [
            &self.device_code,
            &self.token_poll,
            &self.profiles,
            &self.sessions,
        ]
    }
}
