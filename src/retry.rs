//! # Retry Policy
//!
//! Exponential backoff for failed crawl jobs: one minute doubled per prior
//! failure, capped at 24 hours, then scaled by a uniform jitter factor in
//! `[1 - jitter, 1 + jitter]`.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{Rng, thread_rng};

use crate::config::RetryPolicyConfig;

/// Outcome of evaluating a failure against the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Requeue with `retry_count` bumped and the job hidden until `visible_at`.
    Retry {
        retry_count: i32,
        delay: Duration,
        visible_at: DateTime<Utc>,
    },
    /// Retries exhausted; `retry_count` stays where it was.
    Exhausted,
}

/// Backoff parameters. The defaults are the production values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max: Duration::from_secs(24 * 60 * 60),
            jitter_factor: 0.2,
        }
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base_seconds),
            max: Duration::from_secs(config.max_seconds),
            jitter_factor: config.jitter_factor,
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^retry_count, max)` before jitter.
    pub fn base_delay(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.clamp(0, 62) as u32;
        let factor = 1u64 << exponent;
        let base_secs = self.base.as_secs_f64() * factor as f64;
        Duration::from_secs_f64(base_secs.min(self.max.as_secs_f64()))
    }

    /// Base delay scaled by a uniform factor drawn from `[1 - jitter, 1 + jitter]`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, retry_count: i32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry_count);
        if self.jitter_factor <= 0.0 {
            return base;
        }
        let factor = rng.gen_range((1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor));
        base.mul_f64(factor)
    }

    /// Decide what happens to a job that just failed.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        retry_count: i32,
        max_retries: i32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> RetryDecision {
        if retry_count.saturating_add(1) > max_retries {
            return RetryDecision::Exhausted;
        }

        let delay = self.jittered_delay(retry_count, rng);
        let step = ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::MAX);
        RetryDecision::Retry {
            retry_count: retry_count + 1,
            delay,
            visible_at: now.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// [`RetryPolicy::decide`] using the thread-local CSPRNG.
    pub fn decide_now(&self, retry_count: i32, max_retries: i32, now: DateTime<Utc>) -> RetryDecision {
        self.decide(retry_count, max_retries, now, &mut thread_rng())
    }
}
