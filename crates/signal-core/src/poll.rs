//! Adaptive poll cadence for pull transports
//!
//! A healthy relay is polled quickly; a failing one is polled more slowly,
//! and after enough consecutive failures the owner is told to reconnect
//! instead of retrying forever.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SignalError, SignalResult};

/// Poll interval bounds and step sizes
///
/// # Examples
///
/// ```rust
/// # use peercall_signal_core::PollConfig;
/// let config = PollConfig::default();
/// assert_eq!((config.floor_ms, config.ceiling_ms), (2000, 5000));
/// assert!(config.validate().is_ok());
///
/// let inverted = PollConfig {
///     floor_ms: 6000,
///     ..PollConfig::default()
/// };
/// assert!(inverted.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Fastest cadence, reached after successful polls
    pub floor_ms: u64,
    /// Slowest cadence, reached after failing polls
    pub ceiling_ms: u64,
    /// Interval decrease per successful poll
    pub success_step_ms: u64,
    /// Interval increase per failed poll
    pub failure_step_ms: u64,
    /// Consecutive failures before escalating
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            floor_ms: 2000,
            ceiling_ms: 5000,
            success_step_ms: 500,
            failure_step_ms: 1000,
            max_consecutive_failures: 5,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> SignalResult<()> {
        if self.floor_ms == 0 {
            return Err(SignalError::invalid_configuration(
                "poll.floor_ms",
                "poll floor must be positive",
            ));
        }
        if self.floor_ms > self.ceiling_ms {
            return Err(SignalError::invalid_configuration(
                "poll.ceiling_ms",
                format!("floor {}ms exceeds ceiling {}ms", self.floor_ms, self.ceiling_ms),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(SignalError::invalid_configuration(
                "poll.max_consecutive_failures",
                "failure threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// What the owner should do after a failed poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Poll again after the given delay
    Retry(Duration),
    /// Failure threshold reached; reconnect
    Escalate { failures: u32 },
}

#[derive(Debug, Clone)]
pub struct PollScheduler {
    config: PollConfig,
    interval_ms: u64,
    consecutive_failures: u32,
}

impl PollScheduler {
    pub fn new(config: PollConfig) -> Self {
        let interval_ms = config.floor_ms;
        Self {
            config,
            interval_ms,
            consecutive_failures: 0,
        }
    }

    /// Current delay until the next poll
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a successful poll; shrinks the interval toward the floor
    pub fn on_success(&mut self) -> Duration {
        if self.consecutive_failures > 0 {
            debug!(
                failures = self.consecutive_failures,
                "Poll recovered, resetting failure count"
            );
        }
        self.consecutive_failures = 0;
        self.interval_ms = self
            .interval_ms
            .saturating_sub(self.config.success_step_ms)
            .max(self.config.floor_ms);
        self.interval()
    }

    /// Record a failed poll; grows the interval toward the ceiling
    pub fn on_failure(&mut self) -> PollOutcome {
        self.consecutive_failures += 1;
        self.interval_ms = (self.interval_ms + self.config.failure_step_ms).min(self.config.ceiling_ms);

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                failures = self.consecutive_failures,
                "Poll failure threshold reached"
            );
            PollOutcome::Escalate {
                failures: self.consecutive_failures,
            }
        } else {
            debug!(
                failures = self.consecutive_failures,
                next_interval_ms = self.interval_ms,
                "Poll failed, backing off"
            );
            PollOutcome::Retry(self.interval())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_floor() {
        let scheduler = PollScheduler::new(PollConfig::default());
        assert_eq!(scheduler.interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_failures_grow_to_ceiling_then_escalate() {
        let mut scheduler = PollScheduler::new(PollConfig::default());
        assert_eq!(scheduler.on_failure(), PollOutcome::Retry(Duration::from_millis(3000)));
        assert_eq!(scheduler.on_failure(), PollOutcome::Retry(Duration::from_millis(4000)));
        assert_eq!(scheduler.on_failure(), PollOutcome::Retry(Duration::from_millis(5000)));
        assert_eq!(scheduler.on_failure(), PollOutcome::Retry(Duration::from_millis(5000)));
        assert_eq!(scheduler.on_failure(), PollOutcome::Escalate { failures: 5 });
    }

    #[test]
    fn test_success_shrinks_and_resets() {
        let mut scheduler = PollScheduler::new(PollConfig::default());
        scheduler.on_failure();
        scheduler.on_failure();
        scheduler.on_failure();
        assert_eq!(scheduler.on_success(), Duration::from_millis(4500));
        assert_eq!(scheduler.consecutive_failures(), 0);
        for _ in 0..10 {
            scheduler.on_success();
        }
        assert_eq!(scheduler.interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = PollConfig {
            floor_ms: 6000,
            ..PollConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(PollConfig::default().validate().is_ok());
    }
}
