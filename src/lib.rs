//! # procvisor
//!
//! **procvisor** is a dependency-aware process supervisor, small enough to run
//! as PID 1 of a container that has to host several cooperating processes.
//!
//! It resolves a declared graph of services, starts each service only once
//! everything it requires is healthy, restarts crashed processes with capped
//! exponential backoff, probes their health, and shuts everything down
//! gracefully on SIGTERM.
//!
//! ## Architecture
//! ```text
//!  Vec<ServiceSpec>
//!        │
//!        ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Controller                                                       │
//! │  Forest::build ─► shake ─► weight      (fails before any spawn)  │
//! │  SubscriberSet ◄── Bus                 (LogWriter, custom ...)   │
//! └──────┬───────────────────────────────────────────────────────────┘
//!        ▼
//! ┌──────────────────────────┐  launch(spec)   ┌────────────────────────┐
//! │ DependencyScheduler      │ ──────────────► │ ProcessSupervisor (×N) │
//! │  CountdownBarrier / node │                 │  instances, restart,   │
//! │  satisfy(name) cascades  │                 │  HealthChecker         │
//! └──────────▲───────────────┘                 └──────────┬─────────────┘
//!            │                                            │ STARTED / HEALTHY /
//!            │            HEALTHY(name)                   │ UNHEALTHY / DOWN
//!            └──────────────────── Bus ◄──────────────────┘
//! ```
//!
//! ### Activation
//! Every node of the forest holds a [`CountdownBarrier`] seeded with one unit of
//! its own plus one unit per distinct ancestor. Boot removes the own unit, so
//! roots start at once; each `HEALTHY` event removes one unit from every node of
//! the reporting service's subtree. A node starts when its barrier reaches zero,
//! exactly once.
//!
//! ### Supervision
//! ```text
//! Stopped ─► Starting ─► Running ─┬─► Stopping ─► Stopped
//!               ▲                 ├─► Error ────────────┐
//!               │                 └─► HealthCheckFailed │
//!               └────── restart after get_delay(n) ◄────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use procvisor::{Controller, LogWriter, ServiceSpec, Subscribe, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procvisor::RuntimeError> {
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
//!     let controller = Controller::builder(SupervisorConfig::default())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     controller
//!         .run(vec![
//!             ServiceSpec::new("db", "/usr/bin/postgres"),
//!             ServiceSpec::new("api", "/srv/api").with_requires(["db"]),
//!         ])
//!         .await
//! }
//! ```

mod core;
mod error;
mod policies;

pub mod config;
pub mod events;
pub mod health;
pub mod process;
pub mod scheduler;
pub mod subscribers;

pub use config::{
    HealthCheckKind, HealthCheckSpec, Manifest, ServiceKind, ServiceSpec, StdioTarget,
    SupervisorConfig,
};
pub use core::{Controller, ControllerBuilder, wait_for_shutdown_signal};
pub use error::{
    BuildError, ConfigError, HealthCheckError, RuntimeError, ServiceError, SpawnError,
};
pub use events::{
    Broadcaster, Bus, EngineStatus, Event, EventSource, ServiceStatus, WaitOutcome,
    wait_for_engine, wait_for_service,
};
pub use health::{HealthChecker, Probe};
pub use policies::RestartPolicy;
pub use process::{
    CommandSpawner, ControlSignal, ProcessExit, ProcessInstance, ProcessSupervisor, ServiceState,
    Spawner, StatusMessage, StatusSignal,
};
pub use scheduler::{CountdownBarrier, DependencyScheduler, Forest, Launcher, ServiceNode};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
