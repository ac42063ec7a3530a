//! Status polling policy for generation jobs.
//!
//! Polling is bounded two ways: a maximum number of status checks and a
//! wall-clock timeout. The interval between checks may grow in stages
//! as a job runs longer.

use std::time::Duration;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Interval between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Maximum number of status checks before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
/// Wall-clock limit for a single job.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Switch to `interval` once a job has been polled for `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalStage {
    pub after: Duration,
    pub interval: Duration,
}

/// Which bound stopped polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    Attempts(u32),
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingPolicy {
    /// Interval used until the first stage applies.
    pub interval: Duration,
    /// Later intervals, sorted by `after`.
    pub stages: Vec<IntervalStage>,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            stages: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollingPolicy {
    /// Constant interval with the default bounds.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Back off to 5s after 30s and 8s after two minutes.
    pub fn adaptive() -> Self {
        Self::default()
            .with_stage(Duration::from_secs(30), Duration::from_secs(5))
            .with_stage(Duration::from_secs(120), Duration::from_secs(8))
    }

    pub fn with_stage(mut self, after: Duration, interval: Duration) -> Self {
        self.stages.push(IntervalStage { after, interval });
        self.stages.sort_by_key(|s| s.after);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before the next check after `elapsed` time spent polling.
    pub fn interval_at(&self, elapsed: Duration) -> Duration {
        self.stages
            .iter()
            .rev()
            .find(|s| elapsed >= s.after)
            .map_or(self.interval, |s| s.interval)
    }

    /// Whether another check is allowed after `attempts` checks and
    /// `elapsed` time. Returns the bound that was hit, if any.
    pub fn exhausted(&self, attempts: u32, elapsed: Duration) -> Option<PollLimit> {
        if attempts >= self.max_attempts {
            Some(PollLimit::Attempts(attempts))
        } else if elapsed >= self.timeout {
            Some(PollLimit::Timeout(elapsed))
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval.is_zero() || self.stages.iter().any(|s| s.interval.is_zero()) {
            return Err(CoreError::Validation(
                "Polling interval must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::Validation(
                "Polling must allow at least one status check".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CoreError::Validation(
                "Polling timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_image_generation_bounds() {
        let policy = PollingPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(3));
        assert_eq!(policy.max_attempts, 100);
        assert_eq!(policy.timeout, Duration::from_secs(600));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn fixed_interval_never_changes() {
        let policy = PollingPolicy::fixed(Duration::from_millis(500));
        assert_eq!(policy.interval_at(Duration::ZERO), Duration::from_millis(500));
        assert_eq!(
            policy.interval_at(Duration::from_secs(3600)),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn adaptive_intervals_grow_in_stages() {
        let policy = PollingPolicy::adaptive();
        assert_eq!(policy.interval_at(Duration::from_secs(10)), Duration::from_secs(3));
        assert_eq!(policy.interval_at(Duration::from_secs(30)), Duration::from_secs(5));
        assert_eq!(policy.interval_at(Duration::from_secs(90)), Duration::from_secs(5));
        assert_eq!(policy.interval_at(Duration::from_secs(121)), Duration::from_secs(8));
    }

    #[test]
    fn stages_are_sorted_on_insert() {
        let policy = PollingPolicy::default()
            .with_stage(Duration::from_secs(60), Duration::from_secs(9))
            .with_stage(Duration::from_secs(10), Duration::from_secs(4));
        assert_eq!(policy.stages[0].after, Duration::from_secs(10));
        assert_eq!(policy.interval_at(Duration::from_secs(20)), Duration::from_secs(4));
    }

    #[test]
    fn exhausted_by_attempts() {
        let policy = PollingPolicy::default().with_max_attempts(3);
        assert_eq!(policy.exhausted(2, Duration::ZERO), None);
        assert_eq!(policy.exhausted(3, Duration::ZERO), Some(PollLimit::Attempts(3)));
    }

    #[test]
    fn exhausted_by_timeout() {
        let policy = PollingPolicy::default().with_timeout(Duration::from_secs(5));
        assert_eq!(
            policy.exhausted(1, Duration::from_secs(5)),
            Some(PollLimit::Timeout(Duration::from_secs(5)))
        );
    }

    #[test]
    fn validate_rejects_degenerate_policies() {
        assert!(PollingPolicy::fixed(Duration::ZERO).validate().is_err());
        assert!(PollingPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(PollingPolicy::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
