//! # Controller: boots the service forest and drives graceful shutdown.
//!
//! ```text
//! boot(specs, token)
//!   ├─► Forest::build ─► shake ─► weight         (any error: abort, nothing spawned)
//!   ├─► SubscriberSet attached to the bus
//!   ├─► one ProcessSupervisor per service (+ status tracker)
//!   ├─► Bus.publish(engine UP)
//!   ├─► DependencyScheduler::run(token)          (launches services as they unblock)
//!   │
//!   └─ token cancelled
//!        ├─► Bus.publish(engine SHUTDOWN)
//!        └─► shutdown every supervisor within cfg.grace
//!               ├─ all stopped   → Ok(())
//!               └─ grace exceeded → Err(RuntimeError::GraceExceeded { stuck })
//! ```
//!
//! [`Controller::run`] wraps `boot` with OS signal handling: SIGINT, SIGTERM or
//! SIGQUIT cancel the root token.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ControllerBuilder;
use super::shutdown::wait_for_shutdown_signal;
use crate::config::{ServiceSpec, SupervisorConfig};
use crate::error::RuntimeError;
use crate::events::{Bus, EngineStatus, Event};
use crate::process::{ProcessSupervisor, ServiceState, Spawner, StatusMessage, StatusSignal};
use crate::scheduler::{DependencyScheduler, Forest, Launcher};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Boot orchestrator of one service set.
pub struct Controller {
    cfg: SupervisorConfig,
    bus: Bus,
    spawner: Arc<dyn Spawner>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    supervisors: RwLock<HashMap<String, ProcessSupervisor>>,
}

impl Controller {
    pub(super) fn new_internal(
        cfg: SupervisorConfig,
        spawner: Arc<dyn Spawner>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        Self {
            cfg,
            bus: Bus::new(),
            spawner,
            subscribers,
            supervisors: RwLock::new(HashMap::new()),
        }
    }

    /// Starts building a controller.
    pub fn builder(cfg: SupervisorConfig) -> ControllerBuilder {
        ControllerBuilder::new(cfg)
    }

    /// The event bus shared by every supervisor.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Supervisor of `name`, once booted.
    pub fn supervisor(&self, name: &str) -> Option<ProcessSupervisor> {
        self.supervisors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of the supervised services.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .supervisors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Boots `specs` and runs until an OS termination signal arrives.
    pub async fn run(&self, specs: Vec<ServiceSpec>) -> Result<(), RuntimeError> {
        let token = CancellationToken::new();
        let boot = self.boot(specs, token.clone());
        tokio::pin!(boot);

        let signal = tokio::select! {
            res = &mut boot => return res,
            signal = wait_for_shutdown_signal() => signal,
        };
        match &signal {
            Ok(()) => info!("termination signal received"),
            Err(err) => error!(error = %err, "failed to listen for termination signals"),
        }
        token.cancel();
        let res = boot.await;
        signal.map_err(RuntimeError::Signal)?;
        res
    }

    /// Boots `specs` and supervises them until `token` is cancelled, then
    /// shuts everything down within the grace period.
    ///
    /// A malformed service graph fails before any process is spawned.
    pub async fn boot(
        &self,
        specs: Vec<ServiceSpec>,
        token: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let mut forest = Forest::build(specs)?;
        let dropped = forest.shake_default();
        forest.weight();
        info!(services = forest.len(), dropped, "service forest built");
        debug!("service forest:\n{}", forest.render());

        let subs = Arc::new(SubscriberSet::new(self.subscribers.clone()));
        let listener_stop = CancellationToken::new();
        let listener = subs.attach(&self.bus, self.cfg.bus_capacity_clamped(), listener_stop.clone());

        let supervisors = self.spawn_supervisors(&forest, &token);
        let launcher = StartOnLaunch {
            supervisors: Arc::clone(&supervisors),
        };

        self.bus.publish(Event::engine(EngineStatus::UP));
        info!("engine up");
        DependencyScheduler::new(forest, Arc::new(launcher), self.bus.clone())
            .with_capacity(self.cfg.bus_capacity_clamped())
            .run(&token)
            .await;

        info!("shutdown requested");
        self.bus.publish(Event::engine(EngineStatus::SHUTDOWN));
        let res = self.shutdown_all(&supervisors).await;

        listener_stop.cancel();
        let _ = listener.await;
        if let Ok(subs) = Arc::try_unwrap(subs) {
            subs.shutdown().await;
        }
        res
    }

    fn spawn_supervisors(
        &self,
        forest: &Forest,
        token: &CancellationToken,
    ) -> Arc<HashMap<String, ProcessSupervisor>> {
        let mut supervisors = HashMap::with_capacity(forest.len());
        for node in forest.nodes() {
            let (sup, status) = ProcessSupervisor::new(
                Arc::clone(node.spec()),
                &self.cfg,
                Arc::clone(&self.spawner),
                self.bus.clone(),
                token,
            );
            tokio::spawn(track_status(status));
            supervisors.insert(node.name().to_owned(), sup);
        }
        *self
            .supervisors
            .write()
            .unwrap_or_else(PoisonError::into_inner) = supervisors.clone();
        Arc::new(supervisors)
    }

    /// Stops every supervisor concurrently, bounded by the grace period.
    async fn shutdown_all(
        &self,
        supervisors: &HashMap<String, ProcessSupervisor>,
    ) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let stops = join_all(supervisors.iter().map(|(name, sup)| async move {
            match sup.shutdown().await {
                Ok(()) => None,
                Err(err) => {
                    error!(service = %name, error = %err, label = err.as_label(), "service did not stop");
                    Some(name.clone())
                }
            }
        }));

        let mut stuck: Vec<String> = match tokio::time::timeout(grace, stops).await {
            Ok(results) => results.into_iter().flatten().collect(),
            Err(_) => supervisors
                .iter()
                .filter(|(_, sup)| sup.state() != ServiceState::Stopped)
                .map(|(name, _)| name.clone())
                .collect(),
        };

        if stuck.is_empty() {
            info!("all services stopped");
            Ok(())
        } else {
            stuck.sort();
            warn!(grace = ?grace, stuck = ?stuck, "shutdown grace exceeded");
            Err(RuntimeError::GraceExceeded { grace, stuck })
        }
    }
}

/// Starts the supervisor of every launched service.
struct StartOnLaunch {
    supervisors: Arc<HashMap<String, ProcessSupervisor>>,
}

impl Launcher for StartOnLaunch {
    fn launch(&self, spec: &Arc<ServiceSpec>) {
        let Some(sup) = self.supervisors.get(&spec.name).cloned() else {
            warn!(service = %spec.name, "no supervisor for launched service");
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = sup.start().await {
                warn!(service = %sup.name(), error = %err, label = err.as_label(), "service failed to start");
            }
        });
    }
}

async fn track_status(mut rx: mpsc::Receiver<StatusMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg.signal {
            StatusSignal::StateChange => {
                debug!(service = %msg.service, state = %msg.state, "status received");
            }
            StatusSignal::Error => {
                warn!(
                    service = %msg.service,
                    state = %msg.state,
                    error = msg.error.as_deref().unwrap_or_default(),
                    "error status received"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::config::ServiceKind;
    use crate::events::{EventSource, ServiceStatus};
    use crate::process::testing::FakeSpawner;

    fn svc(name: &str) -> ServiceSpec {
        ServiceSpec::new(name, format!("/bin/{name}"))
    }

    fn controller(fake: &FakeSpawner, cfg: SupervisorConfig) -> Arc<Controller> {
        Arc::new(
            Controller::builder(cfg)
                .with_spawner(Arc::new(fake.clone()))
                .build(),
        )
    }

    async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn malformed_graph_aborts_before_any_spawn() {
        let fake = FakeSpawner::new();
        let ctrl = controller(&fake, SupervisorConfig::default());
        let err = ctrl
            .boot(
                vec![svc("api").with_requires(["db"])],
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "runtime_build");
        assert!(fake.spawn_order().is_empty());
        assert!(ctrl.services().is_empty());
    }

    #[tokio::test]
    async fn boots_in_dependency_order_and_shuts_down() {
        let fake = FakeSpawner::new();
        let ctrl = controller(&fake, SupervisorConfig::default());
        let mut events = ctrl.bus().subscription(Some(64));
        let token = CancellationToken::new();

        let boot = {
            let ctrl = Arc::clone(&ctrl);
            let token = token.clone();
            tokio::spawn(async move {
                ctrl.boot(
                    vec![
                        svc("api").with_requires(["db"]),
                        svc("db"),
                        svc("off").with_enabled(false),
                    ],
                    token,
                )
                .await
            })
        };

        eventually("both services", || fake.spawn_order().len() == 2).await;
        assert_eq!(fake.spawn_order(), vec!["db", "api"]);
        assert_eq!(ctrl.services(), vec!["api", "db"]);
        eventually("api running", || {
            ctrl.supervisor("api").map(|s| s.state()) == Some(ServiceState::Running)
        })
        .await;

        token.cancel();
        boot.await.unwrap().unwrap();
        assert_eq!(fake.live_count(), 0);
        assert_eq!(ctrl.supervisor("db").unwrap().state(), ServiceState::Stopped);

        let mut engine = Vec::new();
        while let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            if ev.source == EventSource::Engine {
                engine.push(ev.engine);
            }
        }
        assert_eq!(engine, vec![EngineStatus::UP, EngineStatus::SHUTDOWN]);
    }

    #[tokio::test]
    async fn one_shot_prerequisite_gates_until_completion() {
        let fake = FakeSpawner::new();
        let ctrl = controller(&fake, SupervisorConfig::default());
        let token = CancellationToken::new();
        let boot = {
            let ctrl = Arc::clone(&ctrl);
            let token = token.clone();
            tokio::spawn(async move {
                ctrl.boot(
                    vec![
                        svc("migrate").with_kind(ServiceKind::OneShot),
                        svc("app").with_requires(["migrate"]),
                    ],
                    token,
                )
                .await
            })
        };

        eventually("migration", || fake.spawn_count("migrate") == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.spawn_count("app"), 0);

        fake.exit(fake.last_pid("migrate").unwrap(), 0);
        eventually("app", || fake.spawn_count("app") == 1).await;

        token.cancel();
        boot.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_prerequisite_blocks_dependents() {
        let fake = FakeSpawner::new();
        fake.fail_service("db");
        let ctrl = controller(&fake, SupervisorConfig::default());
        let mut events = ctrl.bus().subscription(Some(64));
        let token = CancellationToken::new();
        let boot = {
            let ctrl = Arc::clone(&ctrl);
            let token = token.clone();
            tokio::spawn(async move {
                ctrl.boot(vec![svc("db"), svc("api").with_requires(["db"]), svc("cron")], token)
                    .await
            })
        };

        eventually("cron", || fake.spawn_count("cron") == 1).await;
        loop {
            let ev = events.recv().await.unwrap();
            if ev.is_service("db", ServiceStatus::DOWN) {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.spawn_count("api"), 0);
        assert_eq!(ctrl.supervisor("db").unwrap().state(), ServiceState::Error);

        token.cancel();
        boot.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn grace_exceeded_names_stuck_services() {
        let fake = FakeSpawner::new();
        fake.ignore_signals();
        let cfg = SupervisorConfig {
            grace: Duration::from_secs(5),
            stop_timeout: Duration::from_millis(20),
            kill_wait: Duration::from_millis(20),
            ..SupervisorConfig::default()
        };
        let ctrl = controller(&fake, cfg);
        let token = CancellationToken::new();
        let boot = {
            let ctrl = Arc::clone(&ctrl);
            let token = token.clone();
            tokio::spawn(async move { ctrl.boot(vec![svc("zombie")], token).await })
        };

        eventually("spawn", || fake.live_count() == 1).await;
        token.cancel();
        let err = boot.await.unwrap().unwrap_err();
        match err {
            RuntimeError::GraceExceeded { stuck, .. } => assert_eq!(stuck, vec!["zombie"]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
