//! # Global runtime configuration.
//!
//! Provides [`SupervisorConfig`] centralized settings for the controller and
//! every service supervisor it creates.
//!
//! ## Sentinel values
//! - `stop_timeout = 0s` → send SIGKILL right after SIGTERM
//! - `grace = 0s` → do not wait for services at shutdown
//! - capacities below 1 are clamped to 1 by the accessors

use std::time::Duration;

use serde::Deserialize;

/// Global configuration for the supervisor runtime.
///
/// ## Field semantics
/// - `grace`: maximum wait for every service to stop after shutdown is requested
/// - `stop_timeout`: SIGTERM→SIGKILL window for services without their own `timeout`
/// - `kill_wait`: how long to wait for an instance to disappear after SIGKILL
/// - `bus_capacity`: output queue size of the runtime's own bus subscriptions
/// - `status_capacity`: depth of each supervisor's status channel
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Maximum time to wait for graceful shutdown of all services.
    ///
    /// When exceeded, `Controller::boot` returns `RuntimeError::GraceExceeded`.
    #[serde(with = "humantime_serde")]
    pub grace: Duration,

    /// Default graceful stop timeout per instance.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Wait after SIGKILL before an instance is reported as stuck.
    #[serde(with = "humantime_serde")]
    pub kill_wait: Duration,

    /// Capacity of the scheduler's and subscriber set's bus subscriptions.
    pub bus_capacity: usize,

    /// Capacity of each supervisor's status channel.
    ///
    /// Status messages are sent without blocking; they are dropped when full.
    pub status_capacity: usize,
}

impl SupervisorConfig {
    /// Bus subscription capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Status channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn status_capacity_clamped(&self) -> usize {
        self.status_capacity.max(1)
    }

    /// Stop timeout for a service: its own `timeout` if set, else the default.
    #[inline]
    pub fn stop_timeout_for(&self, service_timeout: Option<Duration>) -> Duration {
        service_timeout.unwrap_or(self.stop_timeout)
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `stop_timeout = 10s`
    /// - `kill_wait = 5s`
    /// - `bus_capacity = 64`
    /// - `status_capacity = 256`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            kill_wait: Duration::from_secs(5),
            bus_capacity: 64,
            status_capacity: 256,
        }
    }
}
