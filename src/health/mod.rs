//! Health checking.
//!
//! ## Contents
//! - [`Probe`] one reachability check, with [`HttpProbe`], [`TcpProbe`], [`CommandProbe`]
//! - [`build_probe`] validates a [`HealthCheckSpec`](crate::HealthCheckSpec) into a probe
//! - [`HealthChecker`] timeout + retry loop around a probe
//!
//! Scheduling (start period, interval ticker) and the resulting state changes are
//! driven by [`ProcessSupervisor`](crate::ProcessSupervisor).

mod checker;
mod probe;

pub use checker::{HealthChecker, RETRY_PAUSE};
pub use probe::{CommandProbe, HttpProbe, Probe, TcpProbe, build_probe};
