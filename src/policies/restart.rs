//! # Restart policy for supervised services.
//!
//! [`RestartPolicy`] is an immutable value consumed by the
//! [`ProcessSupervisor`](crate::ProcessSupervisor), which keeps its own attempt
//! counter and asks [`RestartPolicy::get_delay`] how long to wait before the
//! next attempt, or whether to give up.
//!
//! ## Delay curve
//! ```text
//! attempt i      0    1    2    3    4     5 ..  9   ≥10        ≥ count / > 65535
//! delay       d0·1 d0·2 d0·4 d0·8 d0·16 ... capped at delay_max   refused (None)
//! ```
//!
//! - `delay` (default 1s) is the first delay.
//! - `delay_max` (default 16s) caps growth; a value below `delay` is treated as `delay`.
//! - `count` limits the number of restarts; `None` restarts forever, `Some(0)` never.
//! - From attempt 10 on the curve is considered saturated and `delay_max` is returned.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::RestartPolicy;
//!
//! let policy = RestartPolicy::default().with_count(6);
//!
//! assert_eq!(policy.get_delay(0), Some(Duration::from_secs(1)));
//! assert_eq!(policy.get_delay(4), Some(Duration::from_secs(16)));
//! assert_eq!(policy.get_delay(5), Some(Duration::from_secs(16)));
//! assert_eq!(policy.get_delay(6), None);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Default first restart delay.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);
/// Default restart delay cap.
pub const DEFAULT_RESTART_DELAY_MAX: Duration = Duration::from_secs(16);

/// Attempts beyond this index are always refused.
const RESTART_ABSOLUTE_MAX: u32 = 65_535;
/// From this attempt on, the exponential curve is assumed saturated.
const MAX_CALCULABLE_ITERATION: u32 = 10;

/// Policy controlling restart backoff and termination.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartPolicy {
    /// Delay before the first restart.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Maximum delay between restarts.
    #[serde(with = "humantime_serde")]
    pub delay_max: Duration,
    /// Maximum number of restarts; `None` means unlimited.
    pub count: Option<u32>,
    /// Exit codes considered a successful run (one-shot services).
    pub ok_codes: Vec<i32>,
}

impl Default for RestartPolicy {
    /// Returns `delay = 1s`, `delay_max = 16s`, unlimited count, `ok_codes = [0]`.
    fn default() -> Self {
        Self {
            delay: DEFAULT_RESTART_DELAY,
            delay_max: DEFAULT_RESTART_DELAY_MAX,
            count: None,
            ok_codes: vec![0],
        }
    }
}

impl RestartPolicy {
    /// Sets the first delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_delay_max(mut self, delay_max: Duration) -> Self {
        self.delay_max = delay_max;
        self
    }

    /// Limits the number of restarts.
    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Replaces the accepted exit codes.
    #[must_use]
    pub fn with_ok_codes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.ok_codes = codes.into();
        self
    }

    /// Effective delay cap (never below `delay`).
    pub fn effective_max(&self) -> Duration {
        self.delay_max.max(self.delay)
    }

    /// Computes the wait before restart attempt `attempt` (zero-based).
    ///
    /// Returns `None` when the restart must not happen: `attempt >= count`
    /// or `attempt` beyond the absolute ceiling.
    pub fn get_delay(&self, attempt: u32) -> Option<Duration> {
        if self.count.is_some_and(|count| attempt >= count) || attempt > RESTART_ABSOLUTE_MAX {
            return None;
        }

        let max = self.effective_max();
        if attempt >= MAX_CALCULABLE_ITERATION {
            return Some(max);
        }

        let delay = self
            .delay
            .checked_mul(1u32 << attempt)
            .map_or(max, |d| d.min(max));
        Some(delay)
    }

    /// Returns `true` if `code` is an accepted exit code.
    pub fn is_ok_exit(&self, code: Option<i32>) -> bool {
        code.is_some_and(|c| self.ok_codes.contains(&c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_then_clamped() {
        let policy = RestartPolicy::default();
        let got: Vec<_> = (0..6).map(|i| policy.get_delay(i).unwrap()).collect();
        let secs = |s| Duration::from_secs(s);
        assert_eq!(got, vec![secs(1), secs(2), secs(4), secs(8), secs(16), secs(16)]);
    }

    #[test]
    fn test_count_refuses() {
        let policy = RestartPolicy::default().with_count(3);
        assert!(policy.get_delay(2).is_some());
        assert_eq!(policy.get_delay(3), None);
        assert_eq!(policy.get_delay(100), None);

        let never = RestartPolicy::default().with_count(0);
        assert_eq!(never.get_delay(0), None);
    }

    #[test]
    fn test_saturation_and_ceiling() {
        let policy = RestartPolicy::default()
            .with_delay(Duration::from_millis(10))
            .with_delay_max(Duration::from_secs(60));
        assert_eq!(policy.get_delay(9), Some(Duration::from_millis(5120)));
        assert_eq!(policy.get_delay(10), Some(Duration::from_secs(60)));
        assert_eq!(policy.get_delay(65_535), Some(Duration::from_secs(60)));
        assert_eq!(policy.get_delay(65_536), None);
    }

    #[test]
    fn test_max_below_delay_is_delay() {
        let policy = RestartPolicy::default()
            .with_delay(Duration::from_secs(5))
            .with_delay_max(Duration::from_secs(2));
        assert_eq!(policy.get_delay(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.get_delay(3), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_delay_restarts_immediately() {
        let policy = RestartPolicy::default()
            .with_delay(Duration::ZERO)
            .with_delay_max(Duration::ZERO);
        assert_eq!(policy.get_delay(4), Some(Duration::ZERO));
    }

    #[test]
    fn test_ok_codes() {
        let policy = RestartPolicy::default().with_ok_codes([0, 3]);
        assert!(policy.is_ok_exit(Some(0)));
        assert!(policy.is_ok_exit(Some(3)));
        assert!(!policy.is_ok_exit(Some(1)));
        assert!(!policy.is_ok_exit(None));
    }

    #[test]
    fn test_deserialize_humantime() {
        let policy: RestartPolicy =
            toml::from_str("delay = \"250ms\"\ndelay_max = \"2s\"\ncount = 4\n").unwrap();
        assert_eq!(policy.delay, Duration::from_millis(250));
        assert_eq!(policy.delay_max, Duration::from_secs(2));
        assert_eq!(policy.count, Some(4));
        assert_eq!(policy.ok_codes, vec![0]);
    }
}
