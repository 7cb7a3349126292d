//! # DependencyScheduler: activates services as their prerequisites turn healthy.
//!
//! ```text
//! run(token)
//!   ├─ subscribe to the bus (before anything starts)
//!   ├─ activate_all(): one boot decrement per node ─► zero? ─► READY + launch
//!   └─ loop: HEALTHY(s) ─► satisfy(s)
//!                              └─ once per node: decrement every node of s's subtree
//!                                                 └─ reached zero? ─► READY + launch
//! ```
//!
//! ## Rules
//! - A node is launched at most once: only the decrement that reaches zero launches.
//! - A node propagates its completion at most once; repeated health events are ignored.
//! - A dependency that never turns healthy leaves its dependents blocked.
//! - Siblings unblocked by the same event are launched in declaration order but run concurrently.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Forest;
use crate::config::ServiceSpec;
use crate::events::{Bus, Event, EventSource, ServiceStatus};

/// Hands a service whose prerequisites are satisfied over to its supervisor.
///
/// Called inline from whichever task performed the last decrement; must not block.
pub trait Launcher: Send + Sync + 'static {
    /// Starts `spec`.
    fn launch(&self, spec: &Arc<ServiceSpec>);
}

impl<F> Launcher for F
where
    F: Fn(&Arc<ServiceSpec>) + Send + Sync + 'static,
{
    fn launch(&self, spec: &Arc<ServiceSpec>) {
        self(spec)
    }
}

/// Countdown-barrier driver over a weighted [`Forest`].
pub struct DependencyScheduler {
    forest: Arc<Forest>,
    launcher: Arc<dyn Launcher>,
    bus: Bus,
    capacity: usize,
}

impl DependencyScheduler {
    /// Creates a scheduler; the forest is weighted here if it was not already.
    pub fn new(mut forest: Forest, launcher: Arc<dyn Launcher>, bus: Bus) -> Self {
        if !forest.is_weighted() {
            forest.weight();
        }
        Self {
            forest: Arc::new(forest),
            launcher,
            bus,
            capacity: 64,
        }
    }

    /// Sets the buffer of the bus subscription used by [`run`](Self::run).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// The forest being driven.
    pub fn forest(&self) -> &Arc<Forest> {
        &self.forest
    }

    /// Applies the boot decrement to every node and launches those that reach zero.
    pub fn activate_all(&self) {
        for idx in 0..self.forest.len() {
            self.decrement(idx);
        }
    }

    /// Records that `name` is healthy and unblocks its subtree.
    ///
    /// Returns `false` for unknown names and for repeated calls.
    pub fn satisfy(&self, name: &str) -> bool {
        let Some(node) = self.forest.node(name) else {
            debug!(service = name, "health event for a service outside the forest");
            return false;
        };
        if !node.mark_satisfied() {
            return false;
        }
        debug!(service = name, dependents = node.subtree().len(), "prerequisite satisfied");
        for &idx in node.subtree() {
            self.decrement(idx);
        }
        true
    }

    fn decrement(&self, idx: usize) {
        let Some(node) = self.forest.node_at(idx) else {
            return;
        };
        if node.barrier().decrement() {
            info!(service = node.name(), "dependencies satisfied, starting");
            self.bus
                .publish(Event::service(node.name(), ServiceStatus::READY));
            self.launcher.launch(node.spec());
        }
    }

    /// Activates the forest, then follows health events until `token` is cancelled
    /// or the bus closes.
    pub async fn run(&self, token: &CancellationToken) {
        let mut events = self.bus.subscription(Some(self.capacity));
        self.activate_all();

        loop {
            let ev = tokio::select! {
                _ = token.cancelled() => break,
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };
            if ev.source != EventSource::Service || !ev.status.matches(ServiceStatus::HEALTHY) {
                continue;
            }
            if let Some(name) = ev.service.as_deref() {
                self.satisfy(name);
            }
        }
    }
}
