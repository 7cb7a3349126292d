//! Configuration: runtime knobs and the service data model.
//!
//! ## Contents
//! - [`SupervisorConfig`] grace period, stop timeouts, channel capacities
//! - [`ServiceSpec`], [`ServiceKind`], [`StdioTarget`] one declared service
//! - [`HealthCheckSpec`], [`HealthCheckKind`] probe settings
//! - [`Manifest`] single-file TOML/JSON loader for the binary
//!
//! Durations are written in humantime form (`"500ms"`, `"1m 30s"`).

mod health;
mod loader;
mod runtime;
mod service;

pub use health::{
    DEFAULT_HEALTH_INTERVAL, DEFAULT_HEALTH_RETRIES, DEFAULT_HEALTH_TIMEOUT, HealthCheckKind,
    HealthCheckSpec,
};
pub use loader::Manifest;
pub use runtime::SupervisorConfig;
pub use service::{ServiceKind, ServiceSpec, StdioTarget};
