//! # ProcessSupervisor: lifecycle of one service.
//!
//! Owns the OS-process instances of one [`ServiceSpec`], restarts them per
//! [`RestartPolicy`](crate::RestartPolicy), drives the [`HealthChecker`] and
//! reports every state change on its status channel and on the [`Bus`].
//!
//! ## Architecture
//! ```text
//!                 control channel ──► control loop ──► start()/stop()/restart/check
//!
//! start() ──► spawn N instances ──► monitor task per instance ──► on_exit()
//!    │                                                              │
//!    └─► health loop (start_period, then every interval)            │ unexpected exit
//!           │ pass → HEALTHY        fail → HealthCheckFailed         ▼
//!                                                 restart driver: get_delay(attempt)
//!                                                   ├─ None → Error (terminal)
//!                                                   └─ sleep (cancellable) → respawn
//! ```
//!
//! ## Rules
//! - `start`, `stop` and a restart's respawn run under one lifecycle lock; they never interleave.
//! - Every run gets a child token of the supervisor token. `stop` cancels it, which
//!   abandons a pending restart and stops the health loop.
//! - Each restart request carries the generation of the instances it concerns;
//!   requests for an older generation are dropped.
//! - `start` does not retry a spawn failure; restarts triggered by exits do.
//! - The restart attempt counter never resets.
//! - Health-check failure changes the state and emits `UNHEALTHY`; it does not kill the process.
//!
//! ## Events
//! | transition | bus event |
//! |---|---|
//! | instances spawned | `STARTED` |
//! | first health pass / recovery / one-shot completion | `HEALTHY` |
//! | → `HealthCheckFailed` | `UNHEALTHY` |
//! | → `Stopped`, → `Error` | `DOWN` (with reason) |

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    ControlSignal, ProcessExit, ProcessInstance, ServiceState, SpawnRequest, Spawner,
    StatusMessage, StatusSignal, build_environment,
};
use crate::config::{ServiceKind, ServiceSpec, SupervisorConfig};
use crate::error::{HealthCheckError, ServiceError};
use crate::events::{Bus, Event, ServiceStatus};
use crate::health::HealthChecker;

/// Depth of the control channel.
const CONTROL_CAPACITY: usize = 16;

/// Supervises all instances of one service. Cheap to clone.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    name: Arc<str>,
    spec: Arc<ServiceSpec>,
    stop_timeout: Duration,
    kill_wait: Duration,
    spawner: Arc<dyn Spawner>,
    bus: Bus,
    status_tx: mpsc::Sender<StatusMessage>,
    control_tx: mpsc::Sender<ControlSignal>,
    restart_tx: mpsc::UnboundedSender<u64>,
    health: Option<Arc<HealthChecker>>,

    state: RwLock<ServiceState>,
    instances: Mutex<Vec<Arc<ProcessInstance>>>,
    restart_count: AtomicU32,
    generation: AtomicU64,
    healthy: AtomicBool,
    completed: AtomicBool,

    token: CancellationToken,
    run_token: Mutex<CancellationToken>,
    lifecycle: AsyncMutex<()>,
}

impl ProcessSupervisor {
    /// Creates a supervisor in state `Stopped` and returns its status channel.
    ///
    /// The supervisor's token is a child of `parent`; cancelling `parent` abandons
    /// pending restarts and stops health checks (processes are stopped by
    /// [`shutdown`](Self::shutdown)).
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        spec: Arc<ServiceSpec>,
        cfg: &SupervisorConfig,
        spawner: Arc<dyn Spawner>,
        bus: Bus,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<StatusMessage>) {
        let name: Arc<str> = Arc::from(spec.name.as_str());
        let (status_tx, status_rx) = mpsc::channel(cfg.status_capacity_clamped());
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        let health = match (&spec.health_check, spec.kind) {
            (Some(check), ServiceKind::Ongoing) => {
                Some(Arc::new(HealthChecker::new(Arc::clone(&name), check)))
            }
            (Some(_), kind) => {
                warn!(service = %name, kind = %kind, "health check ignored for run-to-completion service");
                None
            }
            (None, _) => None,
        };

        let idle_run = CancellationToken::new();
        idle_run.cancel();

        let inner = Arc::new(Inner {
            name,
            stop_timeout: cfg.stop_timeout_for(spec.timeout),
            kill_wait: cfg.kill_wait,
            spec,
            spawner,
            bus,
            status_tx,
            control_tx,
            restart_tx,
            health,
            state: RwLock::new(ServiceState::Stopped),
            instances: Mutex::new(Vec::new()),
            restart_count: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            healthy: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            token: parent.child_token(),
            run_token: Mutex::new(idle_run),
            lifecycle: AsyncMutex::new(()),
        });

        tokio::spawn(control_loop(
            Arc::downgrade(&inner),
            control_rx,
            inner.token.clone(),
        ));
        tokio::spawn(restart_loop(
            Arc::downgrade(&inner),
            restart_rx,
            inner.token.clone(),
        ));

        (Self { inner }, status_rx)
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Service declaration.
    pub fn spec(&self) -> &Arc<ServiceSpec> {
        &self.inner.spec
    }

    /// Current state.
    pub fn state(&self) -> ServiceState {
        self.inner.state()
    }

    /// Snapshot of the current instances.
    pub fn instances(&self) -> Vec<Arc<ProcessInstance>> {
        self.inner.lock_instances().clone()
    }

    /// Restart attempts made so far.
    pub fn restart_count(&self) -> u32 {
        self.inner.restart_count.load(Ordering::SeqCst)
    }

    /// Whether the service has been reported healthy and not failed since.
    pub fn is_healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst)
    }

    /// Sender for control signals.
    pub fn control(&self) -> mpsc::Sender<ControlSignal> {
        self.inner.control_tx.clone()
    }

    /// Spawns all instances.
    ///
    /// `Stopped`/`Error` → `Starting` → `Running`, or `Error` if any instance
    /// fails to spawn (already spawned siblings are stopped again). A running
    /// service and a completed one-shot are left alone.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let inner = &self.inner;
        if inner.token.is_cancelled() {
            return Err(ServiceError::Closed);
        }
        let _guard = inner.lifecycle.lock().await;

        let state = inner.state();
        if matches!(
            state,
            ServiceState::Starting | ServiceState::Running | ServiceState::HealthCheckFailed
        ) {
            debug!(service = %inner.name, state = %state, "already running");
            return Ok(());
        }
        if inner.spec.kind == ServiceKind::OneShot && inner.completed.load(Ordering::SeqCst) {
            debug!(service = %inner.name, "one-shot service already completed");
            return Ok(());
        }

        inner.completed.store(false, Ordering::SeqCst);
        inner.healthy.store(false, Ordering::SeqCst);
        let run = inner.token.child_token();
        inner.replace_run(run.clone());
        inner.transition(ServiceState::Starting, None);
        if let Err(err) = inner.stop_instances().await {
            warn!(service = %inner.name, error = %err, "leftover instances survived");
        }

        match inner.start_instances() {
            Ok(()) => {
                inner.on_started();
                if let Some(checker) = &inner.health {
                    tokio::spawn(Arc::clone(inner).health_loop(Arc::clone(checker), run));
                }
                Ok(())
            }
            Err(err) => {
                run.cancel();
                if let Err(stop_err) = inner.stop_instances().await {
                    warn!(service = %inner.name, error = %stop_err, "failed to clean up after spawn error");
                }
                inner.fail(&err.to_string());
                Err(err)
            }
        }
    }

    /// Stops all instances: SIGTERM, wait for the stop timeout, SIGKILL survivors.
    ///
    /// Ends in `Stopped`. Returns [`ServiceError::Stop`] if some instance
    /// outlived SIGKILL.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let inner = &self.inner;
        let _guard = inner.lifecycle.lock().await;
        inner.run_token().cancel();

        let live = inner.lock_instances().iter().any(|i| i.exit().is_none());
        if inner.state() == ServiceState::Stopped && !live {
            return Ok(());
        }

        inner.transition(ServiceState::Stopping, None);
        let res = inner.stop_instances().await;
        inner.healthy.store(false, Ordering::SeqCst);
        if let Err(err) = &res {
            error!(service = %inner.name, error = %err, "instances did not stop");
        }
        inner.transition(ServiceState::Stopped, res.as_ref().err().map(|_| "stop incomplete"));
        res
    }

    /// Stops the service for good; later `start` calls fail with [`ServiceError::Closed`].
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let res = self.stop().await;
        self.inner.token.cancel();
        res
    }

    /// Runs one probe cycle now, if a health check is configured and the service runs.
    pub fn check_health_now(&self) {
        let inner = &self.inner;
        let Some(checker) = inner.health.clone() else {
            debug!(service = %inner.name, "no health check configured");
            return;
        };
        let run = inner.run_token();
        if run.is_cancelled() {
            return;
        }
        let inner = Arc::clone(inner);
        tokio::spawn(async move { inner.health_cycle(&checker, &run).await });
    }

    async fn handle_control(&self, signal: ControlSignal) {
        debug!(service = %self.inner.name, ?signal, "control signal");
        let res = match signal {
            ControlSignal::Start => self.start().await,
            ControlSignal::Stop => self.stop().await,
            ControlSignal::Restart => {
                if let Err(err) = self.stop().await {
                    warn!(service = %self.inner.name, error = %err, "stop before restart failed");
                }
                self.inner.completed.store(false, Ordering::SeqCst);
                self.start().await
            }
            ControlSignal::HealthCheck => {
                self.check_health_now();
                Ok(())
            }
        };
        if let Err(err) = res {
            warn!(service = %self.inner.name, ?signal, error = %err, label = err.as_label(), "control signal failed");
        }
    }
}

async fn control_loop(
    inner: Weak<Inner>,
    mut rx: mpsc::Receiver<ControlSignal>,
    token: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = token.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else { break };
        ProcessSupervisor { inner }.handle_control(signal).await;
    }
}

async fn restart_loop(
    inner: Weak<Inner>,
    mut rx: mpsc::UnboundedReceiver<u64>,
    token: CancellationToken,
) {
    loop {
        let generation = tokio::select! {
            _ = token.cancelled() => break,
            generation = rx.recv() => match generation {
                Some(generation) => generation,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else { break };
        inner.restart(generation).await;
    }
}

impl Inner {
    fn state(&self) -> ServiceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_instances(&self) -> MutexGuard<'_, Vec<Arc<ProcessInstance>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_token(&self) -> CancellationToken {
        self.run_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_run(&self, run: CancellationToken) {
        let previous = std::mem::replace(
            &mut *self.run_token.lock().unwrap_or_else(PoisonError::into_inner),
            run,
        );
        previous.cancel();
    }

    fn transition(&self, to: ServiceState, reason: Option<&str>) {
        let from = std::mem::replace(
            &mut *self.state.write().unwrap_or_else(PoisonError::into_inner),
            to,
        );
        if from != to {
            self.report(from, to, reason);
        }
    }

    /// Transitions only from one of `from`; returns whether it happened.
    fn transition_from(&self, from: &[ServiceState], to: ServiceState, reason: Option<&str>) -> bool {
        let prev = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !from.contains(&*state) {
                return false;
            }
            std::mem::replace(&mut *state, to)
        };
        if prev != to {
            self.report(prev, to, reason);
        }
        true
    }

    /// Enters `Error` and reports it even when already there.
    fn fail(&self, reason: &str) {
        let from = std::mem::replace(
            &mut *self.state.write().unwrap_or_else(PoisonError::into_inner),
            ServiceState::Error,
        );
        self.report(from, ServiceState::Error, Some(reason));
    }

    fn report(&self, from: ServiceState, to: ServiceState, reason: Option<&str>) {
        let failed = matches!(to, ServiceState::Error | ServiceState::HealthCheckFailed);
        if failed {
            warn!(service = %self.name, from = %from, to = %to, reason = reason.unwrap_or_default(), "state changed");
        } else {
            info!(service = %self.name, from = %from, to = %to, "state changed");
        }

        let status = match to {
            ServiceState::Stopped | ServiceState::Error => Some(ServiceStatus::DOWN),
            ServiceState::HealthCheckFailed => Some(ServiceStatus::UNHEALTHY),
            _ => None,
        };
        if let Some(status) = status {
            let mut ev = Event::service(Arc::clone(&self.name), status);
            if let Some(reason) = reason {
                ev = ev.with_reason(reason);
            }
            self.bus.publish(ev);
        }

        let msg = StatusMessage {
            signal: if failed {
                StatusSignal::Error
            } else {
                StatusSignal::StateChange
            },
            service: Arc::clone(&self.name),
            state: to,
            error: reason.map(Arc::from),
        };
        match self.status_tx.try_send(msg) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(service = %self.name, "status channel full, dropping message");
            }
        }
    }

    fn on_started(&self) {
        self.transition(ServiceState::Running, None);
        self.bus
            .publish(Event::service(Arc::clone(&self.name), ServiceStatus::STARTED));
        if self.spec.kind == ServiceKind::Ongoing && self.health.is_none() {
            self.mark_healthy();
        }
    }

    fn mark_healthy(&self) {
        if !matches!(
            self.state(),
            ServiceState::Running | ServiceState::HealthCheckFailed
        ) {
            return;
        }
        let recovered = self.transition_from(
            &[ServiceState::HealthCheckFailed],
            ServiceState::Running,
            None,
        );
        if !self.healthy.swap(true, Ordering::SeqCst) {
            info!(service = %self.name, recovered, "service healthy");
            self.bus
                .publish(Event::service(Arc::clone(&self.name), ServiceStatus::HEALTHY));
        }
    }

    fn start_instances(self: &Arc<Self>) -> Result<(), ServiceError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let env = build_environment(&self.spec)
            .map_err(|source| ServiceError::Spawn { instance: 0, source })?;

        for id in 0..self.spec.instance_count() {
            let req = SpawnRequest {
                service: &self.name,
                instance: id,
                program: &self.spec.executable,
                args: &self.spec.args,
                env: &env,
                working_dir: self.spec.working_dir.as_deref(),
                stdout: &self.spec.stdout,
                stderr: self.spec.stderr_target(),
            };
            let spawned = match self.spawner.spawn(&req) {
                Ok(spawned) => spawned,
                Err(source) => {
                    error!(service = %self.name, instance = id, error = %source, label = source.as_label(), "spawn failed");
                    return Err(ServiceError::Spawn { instance: id, source });
                }
            };

            let instance = Arc::new(ProcessInstance::new(id, spawned.pid, generation));
            info!(service = %self.name, instance = id, pid = spawned.pid, generation, "instance started");
            self.lock_instances().push(Arc::clone(&instance));

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let exit = match spawned.exit.await {
                    Ok(exit) => exit,
                    Err(err) => {
                        warn!(service = %inner.name, pid = instance.pid(), error = %err, "failed to wait for instance");
                        ProcessExit::default()
                    }
                };
                inner.on_exit(instance, exit).await;
            });
        }
        Ok(())
    }

    async fn stop_instances(&self) -> Result<(), ServiceError> {
        let instances = std::mem::take(&mut *self.lock_instances());
        if instances.is_empty() {
            return Ok(());
        }
        let results = join_all(
            instances
                .iter()
                .map(|i| i.stop(self.spawner.as_ref(), self.stop_timeout, self.kill_wait)),
        )
        .await;
        let stuck: Vec<usize> = instances
            .iter()
            .zip(results)
            .filter(|(_, stopped)| !stopped)
            .map(|(i, _)| i.id())
            .collect();
        if stuck.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Stop { instances: stuck })
        }
    }

    async fn on_exit(self: Arc<Self>, instance: Arc<ProcessInstance>, exit: ProcessExit) {
        let ok = self.spec.kind.is_shot() && self.spec.restart.is_ok_exit(exit.code);
        instance.mark_exited(exit, ok);
        if instance.stop_requested() {
            debug!(service = %self.name, pid = instance.pid(), status = %exit, "instance stopped");
            return;
        }

        let _guard = self.lifecycle.lock().await;
        let generation = instance.generation();
        if generation != self.generation.load(Ordering::SeqCst) || self.run_token().is_cancelled() {
            return;
        }

        if ok {
            info!(service = %self.name, instance = instance.id(), status = %exit, "instance completed");
            let all_done = self.lock_instances().iter().all(|i| {
                i.exit()
                    .is_some_and(|e| self.spec.restart.is_ok_exit(e.code))
            });
            if all_done {
                self.completed.store(true, Ordering::SeqCst);
                self.run_token().cancel();
                self.mark_healthy();
                self.transition(ServiceState::Stopped, Some("completed"));
            }
            return;
        }

        warn!(service = %self.name, instance = instance.id(), pid = instance.pid(), status = %exit, "instance exited unexpectedly");
        self.healthy.store(false, Ordering::SeqCst);
        self.fail(&format!("instance {} {exit}", instance.id()));
        self.request_restart(generation);
    }

    /// Queues a restart for `generation`; false once the restart loop is gone.
    fn request_restart(&self, generation: u64) -> bool {
        match self.restart_tx.send(generation) {
            Ok(()) => true,
            Err(_) => {
                debug!(service = %self.name, generation, "restart loop closed, dropping restart request");
                false
            }
        }
    }

    async fn restart(self: Arc<Self>, generation: u64) {
        let run = self.run_token();
        if run.is_cancelled() || generation != self.generation.load(Ordering::SeqCst) {
            debug!(service = %self.name, generation, "stale restart request");
            return;
        }

        let attempt = self.restart_count.fetch_add(1, Ordering::SeqCst);
        let Some(delay) = self.spec.restart.get_delay(attempt) else {
            let err = ServiceError::RestartExhausted { attempts: attempt };
            error!(service = %self.name, attempts = attempt, "restart limit exceeded");
            self.fail(&err.to_string());
            return;
        };

        info!(service = %self.name, attempt = attempt + 1, delay = ?delay, "restart scheduled");
        tokio::select! {
            _ = run.cancelled() => {
                info!(service = %self.name, attempt = attempt + 1, "restart abandoned");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let _guard = self.lifecycle.lock().await;
        if run.is_cancelled() || generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        self.transition(ServiceState::Starting, None);
        if let Err(err) = self.stop_instances().await {
            warn!(service = %self.name, error = %err, "instances survived restart");
        }
        match self.start_instances() {
            Ok(()) => self.on_started(),
            Err(err) => {
                self.fail(&err.to_string());
                self.request_restart(self.generation.load(Ordering::SeqCst));
            }
        }
    }

    async fn health_loop(self: Arc<Self>, checker: Arc<HealthChecker>, run: CancellationToken) {
        let start_period = checker.start_period();
        if !start_period.is_zero() {
            tokio::select! {
                _ = run.cancelled() => return,
                _ = tokio::time::sleep(start_period) => {}
            }
        }

        // First tick fires at once: the first probe follows start_period, not start_period + interval.
        let mut ticker = tokio::time::interval(checker.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = run.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.health_cycle(&checker, &run).await;
        }
    }

    async fn health_cycle(&self, checker: &HealthChecker, run: &CancellationToken) {
        match checker.check(run).await {
            Ok(()) => self.mark_healthy(),
            Err(HealthCheckError::Canceled) => {}
            Err(err) => {
                error!(service = %self.name, error = %err, label = err.as_label(), "health check failed after all retries");
                let reason = err.to_string();
                if self.transition_from(
                    &[ServiceState::Running, ServiceState::HealthCheckFailed],
                    ServiceState::HealthCheckFailed,
                    Some(&reason),
                ) {
                    self.healthy.store(false, Ordering::SeqCst);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthCheckSpec, StdioTarget};
    use crate::events::EventSource;
    use crate::policies::RestartPolicy;
    use crate::process::CommandSpawner;
    use crate::process::testing::FakeSpawner;

    fn cfg() -> SupervisorConfig {
        SupervisorConfig {
            stop_timeout: Duration::from_secs(2),
            kill_wait: Duration::from_secs(2),
            ..SupervisorConfig::default()
        }
    }

    fn sh(name: &str, script: &str) -> ServiceSpec {
        ServiceSpec::new(name, "/bin/sh")
            .with_args(["-c", script])
            .with_env("PATH", "/usr/bin:/bin")
            .with_stdout(StdioTarget::Null)
    }

    fn supervise(
        spec: ServiceSpec,
        spawner: Arc<dyn Spawner>,
    ) -> (ProcessSupervisor, mpsc::Receiver<StatusMessage>, Bus, CancellationToken) {
        let bus = Bus::new();
        let root = CancellationToken::new();
        let (sup, status) = ProcessSupervisor::new(Arc::new(spec), &cfg(), spawner, bus.clone(), &root);
        (sup, status, bus, root)
    }

    async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn drain_statuses(rx: &mut mpsc::Receiver<StatusMessage>) -> Vec<StatusMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn start_and_stop_real_process() {
        let (sup, mut status, bus, _root) = supervise(
            ServiceSpec::new("sleeper", "/bin/sleep")
                .with_args(["30"])
                .with_stdout(StdioTarget::Null),
            Arc::new(CommandSpawner),
        );
        let mut events = bus.subscription(Some(16));

        sup.start().await.unwrap();
        assert_eq!(sup.state(), ServiceState::Running);
        let instances = sup.instances();
        assert_eq!(instances.len(), 1);
        assert!(instances[0].pid() > 0);
        assert!(sup.is_healthy());

        let started = events.recv().await.unwrap();
        assert!(started.is_service("sleeper", ServiceStatus::STARTED));
        let healthy = events.recv().await.unwrap();
        assert!(healthy.is_service("sleeper", ServiceStatus::HEALTHY));

        sup.stop().await.unwrap();
        assert_eq!(sup.state(), ServiceState::Stopped);
        assert_eq!(instances[0].exit().and_then(|e| e.signal), Some(15));
        assert!(sup.instances().is_empty());

        let down = events.recv().await.unwrap();
        assert!(down.is_service("sleeper", ServiceStatus::DOWN));

        let states: Vec<_> = drain_statuses(&mut status).iter().map(|m| m.state).collect();
        assert_eq!(
            states,
            vec![
                ServiceState::Starting,
                ServiceState::Running,
                ServiceState::Stopping,
                ServiceState::Stopped
            ]
        );
    }

    #[tokio::test]
    async fn stop_escalates_to_kill() {
        let mut cfg = cfg();
        cfg.stop_timeout = Duration::from_millis(200);
        let bus = Bus::new();
        let root = CancellationToken::new();
        let (sup, _status) = ProcessSupervisor::new(
            Arc::new(sh("stubborn", "trap '' TERM; while true; do sleep 1; done")),
            &cfg,
            Arc::new(CommandSpawner),
            bus,
            &root,
        );
        sup.start().await.unwrap();
        let instance = sup.instances().remove(0);
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        sup.stop().await.unwrap();
        assert_eq!(instance.exit().and_then(|e| e.signal), Some(9));
    }

    #[tokio::test]
    async fn spawn_failure_sets_error_without_retry() {
        let (sup, mut status, _bus, _root) = supervise(
            ServiceSpec::new("ghost", "/definitely/missing/binary"),
            Arc::new(CommandSpawner),
        );
        let err = sup.start().await.unwrap_err();
        assert_eq!(err.as_label(), "service_spawn");
        assert_eq!(sup.state(), ServiceState::Error);

        let last = drain_statuses(&mut status).pop().unwrap();
        assert_eq!(last.signal, StatusSignal::Error);
        assert_eq!(last.state, ServiceState::Error);
        assert!(last.error.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sup.restart_count(), 0);
    }

    #[tokio::test]
    async fn one_shot_completion_marks_healthy_and_is_not_rerun() {
        let fake = FakeSpawner::new();
        let (sup, _status, bus, _root) = supervise(
            ServiceSpec::new("migrate", "/bin/migrate").with_kind(ServiceKind::OneShot),
            Arc::new(fake.clone()),
        );
        let mut events = bus.subscription(Some(16));

        sup.start().await.unwrap();
        assert!(!sup.is_healthy());
        fake.exit(fake.last_pid("migrate").unwrap(), 0);

        eventually("one-shot to settle", || sup.state() == ServiceState::Stopped).await;
        assert!(sup.is_healthy());

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(events.recv().await.unwrap().status);
        }
        assert_eq!(
            seen,
            vec![ServiceStatus::STARTED, ServiceStatus::HEALTHY, ServiceStatus::DOWN]
        );

        sup.start().await.unwrap();
        assert_eq!(fake.spawn_count("migrate"), 1);
        assert_eq!(sup.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn multi_shot_runs_again_on_start() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, _root) = supervise(
            ServiceSpec::new("job", "/bin/job").with_kind(ServiceKind::MultiShot),
            Arc::new(fake.clone()),
        );
        sup.start().await.unwrap();
        fake.exit(fake.last_pid("job").unwrap(), 0);
        eventually("first run", || sup.state() == ServiceState::Stopped).await;

        sup.control().send(ControlSignal::Start).await.unwrap();
        eventually("second spawn", || fake.spawn_count("job") == 2).await;
    }

    #[tokio::test]
    async fn one_shot_failure_is_restarted_until_exhausted() {
        let (sup, mut status, _bus, _root) = supervise(
            sh("flaky", "exit 3")
                .with_kind(ServiceKind::OneShot)
                .with_restart(
                    RestartPolicy::default()
                        .with_delay(Duration::from_millis(10))
                        .with_count(2),
                ),
            Arc::new(CommandSpawner),
        );
        sup.start().await.unwrap();

        eventually("restart exhaustion", || sup.restart_count() == 3).await;
        eventually("terminal error", || sup.state() == ServiceState::Error).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let errors: Vec<_> = drain_statuses(&mut status)
            .into_iter()
            .filter(|m| m.signal == StatusSignal::Error)
            .filter_map(|m| m.error)
            .collect();
        assert!(errors.iter().any(|e| e.contains("restart limit exceeded")));
        assert!(!sup.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn ongoing_exit_is_restarted_after_backoff() {
        let fake = FakeSpawner::new();
        let (sup, _status, bus, _root) = supervise(
            ServiceSpec::new("web", "/bin/web")
                .with_restart(RestartPolicy::default().with_delay(Duration::from_secs(10))),
            Arc::new(fake.clone()),
        );
        let mut events = bus.subscription(Some(16));
        sup.start().await.unwrap();

        fake.exit(fake.last_pid("web").unwrap(), 0);
        eventually("error state", || sup.state() == ServiceState::Error).await;
        assert_eq!(fake.spawn_count("web"), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        eventually("respawn", || fake.spawn_count("web") == 2).await;
        assert_eq!(sup.state(), ServiceState::Running);

        let mut statuses = Vec::new();
        while statuses.len() < 5 {
            let ev = events.recv().await.unwrap();
            assert_eq!(ev.source, EventSource::Service);
            statuses.push(ev.status);
        }
        assert_eq!(
            statuses,
            vec![
                ServiceStatus::STARTED,
                ServiceStatus::HEALTHY,
                ServiceStatus::DOWN,
                ServiceStatus::STARTED,
                ServiceStatus::HEALTHY
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn root_cancel_during_backoff_abandons_restart() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, root) = supervise(
            ServiceSpec::new("web", "/bin/web")
                .with_restart(RestartPolicy::default().with_delay(Duration::from_secs(10))),
            Arc::new(fake.clone()),
        );
        sup.start().await.unwrap();
        fake.exit(fake.last_pid("web").unwrap(), 1);
        eventually("error state", || sup.state() == ServiceState::Error).await;

        root.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.spawn_count("web"), 1);
        assert_eq!(sup.start().await.unwrap_err().as_label(), "service_closed");
    }

    #[tokio::test(start_paused = true)]
    async fn restart_request_after_loop_exit_is_dropped() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, root) = supervise(
            ServiceSpec::new("web", "/bin/web"),
            Arc::new(fake.clone()),
        );
        let generation = sup.inner.generation.load(Ordering::SeqCst);
        assert!(sup.inner.request_restart(generation + 1));

        root.cancel();
        eventually("restart loop exit", || !sup.inner.request_restart(generation)).await;
        assert_eq!(fake.spawn_count("web"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_abandons_restart() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, _root) = supervise(
            ServiceSpec::new("web", "/bin/web"),
            Arc::new(fake.clone()),
        );
        sup.start().await.unwrap();
        fake.exit(fake.last_pid("web").unwrap(), 1);
        eventually("error state", || sup.state() == ServiceState::Error).await;

        sup.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.spawn_count("web"), 1);
        assert_eq!(sup.state(), ServiceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_count_never_restarts() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, _root) = supervise(
            ServiceSpec::new("once", "/bin/once").with_restart(RestartPolicy::default().with_count(0)),
            Arc::new(fake.clone()),
        );
        sup.start().await.unwrap();
        fake.exit(fake.last_pid("once").unwrap(), 2);
        eventually("exhaustion", || sup.restart_count() == 1).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.spawn_count("once"), 1);
        assert_eq!(sup.state(), ServiceState::Error);
    }

    #[tokio::test]
    async fn process_count_spawns_every_instance() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, _root) = supervise(
            ServiceSpec::new("workers", "/bin/w").with_process_count(3),
            Arc::new(fake.clone()),
        );
        sup.start().await.unwrap();
        let ids: Vec<_> = sup.instances().iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        sup.stop().await.unwrap();
        assert_eq!(fake.live_count(), 0);
    }

    #[tokio::test]
    async fn first_probe_follows_start_period_without_waiting_an_interval() {
        let fake = FakeSpawner::new();
        let (sup, _status, _bus, _root) = supervise(
            ServiceSpec::new("api", "/bin/api").with_health_check(
                HealthCheckSpec::cmd(["/bin/true"])
                    .with_retries(1)
                    .with_start_period(Duration::from_millis(200))
                    .with_interval(Duration::from_secs(3600)),
            ),
            Arc::new(fake.clone()),
        );
        sup.start().await.unwrap();
        assert!(!sup.is_healthy());

        eventually("healthy after start period", || sup.is_healthy()).await;
        assert_eq!(sup.state(), ServiceState::Running);
        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_probe_marks_unhealthy_and_recovery_restores() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("up");
        let script = format!("test -e {}", flag.display());
        let fake = FakeSpawner::new();
        let (sup, mut status, bus, _root) = supervise(
            ServiceSpec::new("api", "/bin/api").with_health_check(
                HealthCheckSpec::cmd(["/bin/sh", "-c", script.as_str()])
                    .with_retries(1)
                    .with_interval(Duration::from_millis(100)),
            ),
            Arc::new(fake.clone()),
        );
        let mut events = bus.subscription(Some(16));
        sup.start().await.unwrap();

        eventually("unhealthy", || sup.state() == ServiceState::HealthCheckFailed).await;
        assert!(!sup.is_healthy());
        assert_eq!(fake.live_count(), 1);

        std::fs::write(&flag, "").unwrap();
        eventually("recovery", || sup.is_healthy()).await;
        assert_eq!(sup.state(), ServiceState::Running);

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(events.recv().await.unwrap().status);
        }
        assert_eq!(
            seen,
            vec![ServiceStatus::STARTED, ServiceStatus::UNHEALTHY, ServiceStatus::HEALTHY]
        );
        assert!(
            drain_statuses(&mut status)
                .iter()
                .any(|m| m.signal == StatusSignal::Error && m.state == ServiceState::HealthCheckFailed)
        );
        sup.shutdown().await.unwrap();
    }
}
