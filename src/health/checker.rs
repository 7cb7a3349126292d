//! # HealthChecker: one probe cycle with timeout and retries.
//!
//! ```text
//! check(token):
//!   attempt 1 ── timeout(probe) ── ok? ─► Ok
//!      │ fail
//!      └─ 1s pause (cancellable) ─► attempt 2 ... attempt `retries` ─► Err(last error)
//! ```
//!
//! ## Rules
//! - Each attempt has its own timeout.
//! - The first success ends the cycle.
//! - Non-retryable errors (invalid configuration) end the cycle immediately.
//! - Cancellation interrupts both the probe and the pause.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::probe::{InvalidProbe, Probe, build_probe};
use crate::config::HealthCheckSpec;
use crate::error::HealthCheckError;

/// Pause between attempts of one cycle.
pub const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Runs probe cycles for one service.
pub struct HealthChecker {
    service: Arc<str>,
    probe: Box<dyn Probe>,
    interval: Duration,
    timeout: Duration,
    retries: u32,
    start_period: Duration,
}

impl HealthChecker {
    /// Creates a checker from a spec.
    ///
    /// An invalid spec does not fail construction: every cycle reports the
    /// configuration error instead, so the service surfaces it as unhealthy.
    pub fn new(service: impl Into<Arc<str>>, spec: &HealthCheckSpec) -> Self {
        let service = service.into();
        let probe = build_probe(spec).unwrap_or_else(|err| {
            warn!(service = %service, error = %err, "invalid health check");
            Box::new(InvalidProbe {
                reason: err.to_string(),
            })
        });
        Self::with_probe(service, probe, spec)
    }

    /// Creates a checker around a custom probe, taking timings from `spec`.
    pub fn with_probe(
        service: impl Into<Arc<str>>,
        probe: Box<dyn Probe>,
        spec: &HealthCheckSpec,
    ) -> Self {
        Self {
            service: service.into(),
            probe,
            interval: spec.interval(),
            timeout: spec.timeout(),
            retries: spec.retries(),
            start_period: spec.start_period(),
        }
    }

    /// Pause between cycles.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Initial grace period before the first cycle.
    pub fn start_period(&self) -> Duration {
        self.start_period
    }

    /// Runs one cycle of up to `retries` attempts.
    pub async fn check(&self, token: &CancellationToken) -> Result<(), HealthCheckError> {
        let mut last = HealthCheckError::Canceled;
        for attempt in 1..=self.retries {
            if attempt > 1 {
                debug!(service = %self.service, attempt, "retrying health check");
                tokio::select! {
                    _ = token.cancelled() => return Err(HealthCheckError::Canceled),
                    _ = tokio::time::sleep(RETRY_PAUSE) => {}
                }
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => return Err(HealthCheckError::Canceled),
                res = tokio::time::timeout(self.timeout, self.probe.probe()) => res,
            };
            match outcome {
                Ok(Ok(())) => {
                    debug!(service = %self.service, probe = self.probe.name(), attempt, "health check passed");
                    return Ok(());
                }
                Ok(Err(err)) => last = err,
                Err(_) => {
                    last = HealthCheckError::Timeout {
                        timeout: self.timeout,
                    }
                }
            }

            warn!(
                service = %self.service,
                probe = self.probe.name(),
                attempt,
                error = %last,
                "health check attempt failed"
            );
            if !last.is_retryable() {
                break;
            }
        }
        Err(last)
    }
}
