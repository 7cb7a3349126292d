//! One running OS process of a service.
//!
//! State is guarded per instance; no lock is shared between instances.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::{ProcessExit, ServiceState, Spawner, StopSignal};

#[derive(Debug)]
struct InstanceState {
    state: ServiceState,
    stop_requested: bool,
}

/// Handle to one spawned process.
#[derive(Debug)]
pub struct ProcessInstance {
    id: usize,
    pid: u32,
    generation: u64,
    started_at: SystemTime,
    inner: Mutex<InstanceState>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
}

impl ProcessInstance {
    pub(crate) fn new(id: usize, pid: u32, generation: u64) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            id,
            pid,
            generation,
            started_at: SystemTime::now(),
            inner: Mutex::new(InstanceState {
                state: ServiceState::Running,
                stop_requested: false,
            }),
            exit_tx,
        }
    }

    /// Instance id, `0..process_count`.
    pub fn id(&self) -> usize {
        self.id
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Start timestamp.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Current state of this instance.
    pub fn state(&self) -> ServiceState {
        self.lock().state
    }

    /// Exit status once the process has been reaped.
    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_tx.borrow()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Records the exit and wakes every waiter.
    pub(crate) fn mark_exited(&self, exit: ProcessExit, ok: bool) {
        let mut st = self.lock();
        st.state = if ok || st.stop_requested {
            ServiceState::Stopped
        } else {
            ServiceState::Error
        };
        self.exit_tx.send_replace(Some(exit));
    }

    /// Waits up to `timeout` for the exit; `None` if still alive.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ProcessExit> {
        let mut rx = self.exit_tx.subscribe();
        let exit = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            _ => None,
        };
        exit
    }

    /// SIGTERM, wait `timeout`, then SIGKILL and wait `kill_wait`.
    ///
    /// Returns `false` if the process is still alive afterwards.
    pub(crate) async fn stop(
        &self,
        spawner: &dyn Spawner,
        timeout: Duration,
        kill_wait: Duration,
    ) -> bool {
        {
            let mut st = self.lock();
            if self.exit_tx.borrow().is_some() {
                return true;
            }
            st.stop_requested = true;
            st.state = ServiceState::Stopping;
        }

        debug!(pid = self.pid, instance = self.id, "sending SIGTERM");
        if let Err(err) = spawner.signal(self.pid, StopSignal::Terminate) {
            warn!(pid = self.pid, error = %err, "failed to send SIGTERM");
        }
        if self.wait_exit(timeout).await.is_some() {
            return true;
        }

        warn!(pid = self.pid, instance = self.id, timeout = ?timeout, "did not stop in time, sending SIGKILL");
        if let Err(err) = spawner.signal(self.pid, StopSignal::Kill) {
            warn!(pid = self.pid, error = %err, "failed to send SIGKILL");
        }
        self.wait_exit(kill_wait).await.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InstanceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
