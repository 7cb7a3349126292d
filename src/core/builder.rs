use std::sync::Arc;

use super::Controller;
use crate::config::SupervisorConfig;
use crate::process::{CommandSpawner, Spawner};
use crate::subscribers::Subscribe;

/// Builder for a [`Controller`].
pub struct ControllerBuilder {
    cfg: SupervisorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    spawner: Option<Arc<dyn Spawner>>,
}

impl ControllerBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            spawner: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive bus events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the process spawner (default: [`CommandSpawner`]).
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Builds the controller. Nothing runs until [`Controller::boot`] or [`Controller::run`].
    pub fn build(self) -> Controller {
        let spawner = self
            .spawner
            .unwrap_or_else(|| Arc::new(CommandSpawner));
        Controller::new_internal(self.cfg, spawner, self.subscribers)
    }
}
