//! Reconnection policy and the single cancelable retry timer.
//!
//! Every abnormal close schedules exactly one retry. The default policy is a
//! fixed delay with unlimited attempts; setting `multiplier`, `jitter` and
//! `max_attempts` turns it into a capped exponential backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// How long to wait before reconnecting, and when to give up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Ceiling for any computed delay.
    pub max_delay_ms: u64,
    /// Growth factor per consecutive failure. `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Fraction in `[0, 1]` of the delay that may be randomly shaved off.
    pub jitter: f64,
    /// Consecutive failed attempts allowed before the session is terminated.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 3_000,
            max_delay_ms: 30_000,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, unlimited attempts.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            base_delay_ms: ms,
            max_delay_ms: ms,
            ..Self::default()
        }
    }

    /// Capped exponential backoff with jitter.
    pub fn exponential(base: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts,
        }
    }

    /// Delay before 1-based retry `attempt`, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let ceiling = self.max_delay_ms.max(self.base_delay_ms) as f64;
        let raw = (self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent)).min(ceiling);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            let shave = rand::thread_rng().gen_range(0.0..=jitter);
            raw * (1.0 - shave)
        } else {
            raw
        };
        Some(Duration::from_millis(delay.round() as u64))
    }
}

/// The one pending reconnection attempt, if any.
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    deadline: Option<Instant>,
    attempt: u32,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the next retry after an abnormal close, replacing any already
    /// scheduled one. Returns `None` when the policy gives up.
    pub fn schedule(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        match policy.delay_for(self.attempt) {
            Some(delay) => {
                self.deadline = Some(Instant::now() + delay);
                Some(delay)
            }
            None => {
                self.deadline = None;
                None
            }
        }
    }

    /// Drop any scheduled retry and forget the failure streak.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.attempt = 0;
    }

    /// A connection opened: the failure streak is over.
    pub fn reset_attempts(&mut self) {
        self.attempt = 0;
    }

    pub fn is_scheduled(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Resolve when the scheduled retry is due, returning its attempt number.
    /// Never resolves while nothing is scheduled. Cancel-safe.
    pub async fn fired(&mut self) -> u32 {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => return std::future::pending().await,
        };
        sleep_until(deadline).await;
        self.deadline = None;
        self.attempt
    }
}
