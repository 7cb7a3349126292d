//! Process supervision.
//!
//! ## Contents
//! - [`ServiceState`], [`ControlSignal`], [`StatusMessage`] lifecycle vocabulary
//! - [`build_environment`] resolves the environment of a service
//! - [`Spawner`] launches and signals OS processes; [`CommandSpawner`] is the real one
//! - [`ProcessInstance`] one running process
//! - [`ProcessSupervisor`] start/stop/restart/health for all instances of one service

mod env;
mod instance;
mod spawn;
mod state;
mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use env::{build_environment, load_env_file};
pub use instance::ProcessInstance;
pub use spawn::{CommandSpawner, SpawnRequest, Spawned, Spawner, StopSignal, signal_group};
pub use state::{ControlSignal, ProcessExit, ServiceState, StatusMessage, StatusSignal};
pub use supervisor::ProcessSupervisor;
