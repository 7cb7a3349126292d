//! # Process spawning capability.
//!
//! [`Spawner`] is the seam between a supervisor and the OS. The default
//! [`CommandSpawner`] uses `tokio::process::Command`; tests wrap it to count or
//! fail spawns.
//!
//! ## Rules
//! - Every instance is started in its own process group (pgid = pid), so
//!   [`Spawner::signal`] reaches shell wrappers and their children alike.
//! - The environment is replaced, never merged: the request carries the full
//!   environment built by [`build_environment`](super::build_environment).
//! - stdin is `/dev/null`.
//! - Dropping [`Spawned::exit`] kills the child (`kill_on_drop`).

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::Stdio;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::process::Command;

use super::ProcessExit;
use crate::config::StdioTarget;
use crate::error::SpawnError;

/// Which signal to deliver when stopping an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful termination (SIGTERM).
    Terminate,
    /// Forced kill (SIGKILL).
    Kill,
}

/// Everything needed to start one instance.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    /// Owning service.
    pub service: &'a str,
    /// Instance id within the service.
    pub instance: usize,
    /// Executable.
    pub program: &'a Path,
    /// Arguments.
    pub args: &'a [String],
    /// Complete environment.
    pub env: &'a BTreeMap<String, String>,
    /// Working directory.
    pub working_dir: Option<&'a Path>,
    /// stdout target.
    pub stdout: &'a StdioTarget,
    /// stderr target.
    pub stderr: &'a StdioTarget,
}

/// A started instance: its pid and a future resolving on exit.
pub struct Spawned {
    /// OS process id (also the process group id).
    pub pid: u32,
    /// Resolves once the process has exited and was reaped.
    pub exit: BoxFuture<'static, io::Result<ProcessExit>>,
}

/// Starts processes and delivers stop signals to them.
pub trait Spawner: Send + Sync + 'static {
    /// Starts one instance.
    fn spawn(&self, req: &SpawnRequest<'_>) -> Result<Spawned, SpawnError>;

    /// Delivers `signal` to the process group of `pid`.
    ///
    /// A group that no longer exists is not an error.
    fn signal(&self, pid: u32, signal: StopSignal) -> io::Result<()> {
        signal_group(pid, signal)
    }
}

/// Sends `signal` to the process group led by `pid`.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: StopSignal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    let sig = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Process groups are a unix concept; elsewhere there is nothing to signal.
#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: StopSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signals require unix",
    ))
}

/// Default [`Spawner`] backed by `tokio::process::Command`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandSpawner;

impl Spawner for CommandSpawner {
    fn spawn(&self, req: &SpawnRequest<'_>) -> Result<Spawned, SpawnError> {
        let mut cmd = Command::new(req.program);
        cmd.args(req.args)
            .env_clear()
            .envs(req.env)
            .stdin(Stdio::null())
            .stdout(open_stdio(req.stdout)?)
            .stderr(open_stdio(req.stderr)?)
            .kill_on_drop(true);
        if let Some(dir) = req.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| SpawnError::Os {
            program: req.program.to_path_buf(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SpawnError::MissingPid {
            program: req.program.to_path_buf(),
        })?;

        let exit = async move { child.wait().await.map(ProcessExit::from_status) }.boxed();
        Ok(Spawned { pid, exit })
    }
}

fn open_stdio(target: &StdioTarget) -> Result<Stdio, SpawnError> {
    Ok(match target {
        StdioTarget::Inherit => Stdio::inherit(),
        StdioTarget::Null => Stdio::null(),
        StdioTarget::File(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Stdio::from)
            .map_err(|source| SpawnError::Stdio {
                path: path.clone(),
                source,
            })?,
    })
}
