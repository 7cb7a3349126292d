//! Service states and the messages exchanged with a supervisor.

use std::fmt;
use std::sync::Arc;

/// Lifecycle state of one service.
///
/// ```text
/// Stopped ─► Starting ─► Running ─┬─► Stopping ─► Stopped
///               ▲                 ├─► Error ─────────┐
///               │                 └─► HealthCheckFailed
///               └──────────── restart ◄──────────────┘
/// ```
///
/// `Error` is terminal only once the restart policy refuses another attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Not running.
    #[default]
    Stopped,
    /// Instances are being spawned.
    Starting,
    /// Every instance was spawned.
    Running,
    /// Instances are being terminated.
    Stopping,
    /// Spawn failure or exit; may be followed by a restart.
    Error,
    /// Probe retries were exhausted; the processes keep running.
    HealthCheckFailed,
}

impl ServiceState {
    /// Returns a short stable label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Error => "error",
            ServiceState::HealthCheckFailed => "health_check_failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Commands accepted on a supervisor's control channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// Start the service (ignored by a completed one-shot).
    Start,
    /// Stop every instance.
    Stop,
    /// Stop, then start again.
    Restart,
    /// Run one probe cycle now.
    HealthCheck,
}

/// Kind of status report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusSignal {
    /// The service changed state.
    StateChange,
    /// An error occurred; `error` carries the message.
    Error,
}

/// Report sent on a supervisor's status channel.
#[derive(Clone, Debug)]
pub struct StatusMessage {
    /// Kind of report.
    pub signal: StatusSignal,
    /// Service name.
    pub service: Arc<str>,
    /// State at the time of the report.
    pub state: ServiceState,
    /// Error detail for [`StatusSignal::Error`].
    pub error: Option<Arc<str>>,
}

/// Exit status of one instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Builds an exit status from the OS status.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "killed by signal {sig}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}
