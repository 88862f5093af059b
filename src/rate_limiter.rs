//! # Outbound Rate Limiter
//!
//! A single pacing gate shared by every outbound call made while executing
//! crawl jobs. One permit is released per interval (burst of one), so aggregate
//! request rate stays fixed no matter how many workers are running.
//!
//! The limiter is an explicit object: build it once at startup, hand an
//! `Arc<RateLimiter>` to each caller, and [`RateLimiter::close`] it on shutdown.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{
    Quota, RateLimiter as GovernorLimiter, clock::DefaultClock, state::InMemoryState,
    state::NotKeyed,
};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RateLimitConfig;

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimiterError {
    #[error("rate limiter interval must be greater than zero")]
    ZeroInterval,
    #[error("rate limiter has been closed")]
    Closed,
}

/// Process-wide pacing gate for outbound network calls.
pub struct RateLimiter {
    limiter: DirectLimiter,
    interval: Duration,
    closed: CancellationToken,
}

impl RateLimiter {
    /// Build a limiter that releases one permit every `interval`.
    pub fn new(interval: Duration) -> Result<Self, RateLimiterError> {
        let quota = Quota::with_period(interval)
            .ok_or(RateLimiterError::ZeroInterval)?
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            limiter: GovernorLimiter::direct(quota),
            interval,
            closed: CancellationToken::new(),
        })
    }

    /// Build a limiter from a target request rate.
    pub fn per_minute(requests_per_minute: u32) -> Result<Self, RateLimiterError> {
        if requests_per_minute == 0 {
            return Err(RateLimiterError::ZeroInterval);
        }
        Self::new(Duration::from_secs(60) / requests_per_minute)
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimiterError> {
        Self::per_minute(config.requests_per_minute)
    }

    /// Spacing enforced between permits.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next permit. Returns [`RateLimiterError::Closed`] once the
    /// limiter is closed, including for callers already waiting.
    pub async fn acquire(&self) -> Result<(), RateLimiterError> {
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(RateLimiterError::Closed),
            _ = self.limiter.until_ready() => {
                let waited = started.elapsed();
                counter!("rate_limiter_permits_total").increment(1);
                histogram!("rate_limiter_wait_ms").record(waited.as_secs_f64() * 1_000.0);
                Ok(())
            }
        }
    }

    /// Honor an explicit upstream delay, then still acquire a regular permit.
    pub async fn acquire_after(&self, delay: Duration) -> Result<(), RateLimiterError> {
        debug!(delay_ms = delay.as_millis() as u64, "Waiting for upstream-requested delay");
        counter!("rate_limiter_upstream_delays_total").increment(1);

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(RateLimiterError::Closed),
            _ = sleep(delay) => {}
        }

        self.acquire().await
    }

    /// Stop issuing permits and release every waiter with an error.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .field("closed", &self.is_closed())
            .finish()
    }
}
