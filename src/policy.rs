use std::time::Duration;

use crate::config::DeliveryConfig;
use crate::types::EventDeliveryStatus;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_retries: u32,
    pub jitter: Duration,
}

/// What to do after an attempt finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Delivered; finalize as success.
    Complete,
    /// Run again after the countdown.
    Retry { countdown: Duration },
    /// Budget spent; finalize as failed.
    Exhausted,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            backoff: config.retry_backoff,
            max_retries: config.max_retries,
            jitter: config.retry_jitter,
        }
    }

    /// `backoff * 2^retries`, without jitter.
    pub fn countdown(&self, retries: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retries))
    }

    pub fn retries_remaining(&self, retries: u32) -> u32 {
        self.max_retries.saturating_sub(retries)
    }

    /// Decide from the attempt status and the retries already performed.
    pub fn decide(&self, status: EventDeliveryStatus, retries: u32) -> RetryDecision {
        match status {
            EventDeliveryStatus::Success => RetryDecision::Complete,
            _ if self.retries_remaining(retries) == 0 => RetryDecision::Exhausted,
            _ => RetryDecision::Retry {
                countdown: self.countdown(retries),
            },
        }
    }

    /// Countdown plus a random jitter, never shorter than the countdown.
    pub fn jittered(&self, countdown: Duration) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return countdown;
        }
        countdown + Duration::from_millis(fastrand::u64(0..=jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// How one run of the async orchestrator ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Delivery record no longer exists.
    Missing,
    /// Delivery was already terminal; nothing was sent.
    AlreadyFinal(EventDeliveryStatus),
    /// Webhook disabled; delivery failed without an attempt.
    Disabled,
    Delivered,
    /// Failed attempt, another run is scheduled.
    RetryScheduled { countdown: Duration, retries_remaining: u32 },
    /// Failed attempt with no budget left.
    Exhausted,
    /// Target cannot be served by any transport.
    Rejected(String),
}

impl AttemptOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptOutcome::RetryScheduled { .. })
    }
}
