//! In-memory [`Spawner`] for tests: no OS processes, exits are scripted.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::oneshot;

use super::{ProcessExit, SpawnRequest, Spawned, Spawner, StopSignal};
use crate::error::SpawnError;

#[derive(Default)]
struct State {
    live: HashMap<u32, oneshot::Sender<ProcessExit>>,
    spawned: Vec<(String, u32)>,
    fail: Vec<String>,
    ignore_signals: bool,
}

/// Records spawns; instances exit when told to or when signalled.
#[derive(Clone, Default)]
pub(crate) struct FakeSpawner {
    next_pid: Arc<AtomicU32>,
    state: Arc<Mutex<State>>,
}

impl FakeSpawner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every spawn of `service` fail.
    pub(crate) fn fail_service(&self, service: &str) {
        self.state.lock().unwrap().fail.push(service.to_owned());
    }

    /// Makes instances ignore SIGTERM and SIGKILL.
    pub(crate) fn ignore_signals(&self) {
        self.state.lock().unwrap().ignore_signals = true;
    }

    /// Service names in spawn order.
    pub(crate) fn spawn_order(&self) -> Vec<String> {
        self.state.lock().unwrap().spawned.iter().map(|(s, _)| s.clone()).collect()
    }

    pub(crate) fn spawn_count(&self, service: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .spawned
            .iter()
            .filter(|(s, _)| s == service)
            .count()
    }

    /// Pid of the latest spawn of `service`.
    pub(crate) fn last_pid(&self, service: &str) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .spawned
            .iter()
            .rev()
            .find(|(s, _)| s == service)
            .map(|(_, pid)| *pid)
    }

    /// Lets a live instance exit with `code`.
    pub(crate) fn exit(&self, pid: u32, code: i32) {
        if let Some(tx) = self.state.lock().unwrap().live.remove(&pid) {
            let _ = tx.send(ProcessExit {
                code: Some(code),
                signal: None,
            });
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, req: &SpawnRequest<'_>) -> Result<Spawned, SpawnError> {
        let mut state = self.state.lock().unwrap();
        if state.fail.iter().any(|s| s == req.service) {
            return Err(SpawnError::Os {
                program: req.program.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted failure"),
            });
        }
        let pid = 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        state.live.insert(pid, tx);
        state.spawned.push((req.service.to_owned(), pid));
        let exit = rx
            .map(|res| res.map_err(|_| io::Error::new(io::ErrorKind::Other, "fake process lost")))
            .boxed();
        Ok(Spawned { pid, exit })
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.ignore_signals {
            return Ok(());
        }
        if let Some(tx) = state.live.remove(&pid) {
            let sig = match signal {
                StopSignal::Terminate => 15,
                StopSignal::Kill => 9,
            };
            let _ = tx.send(ProcessExit {
                code: None,
                signal: Some(sig),
            });
        }
        Ok(())
    }
}
