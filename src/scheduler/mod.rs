//! Dependency scheduling.
//!
//! ## Contents
//! - [`Forest`] / [`ServiceNode`] the validated dependency graph (build, shake, weight, render)
//! - [`CountdownBarrier`] per-node count of unsatisfied prerequisites
//! - [`DependencyScheduler`] launches nodes as their barriers reach zero
//! - [`Launcher`] the hand-off to whatever starts a service

mod barrier;
mod driver;
mod forest;

pub use barrier::CountdownBarrier;
pub use driver::{DependencyScheduler, Launcher};
pub use forest::{Forest, ServiceNode};
