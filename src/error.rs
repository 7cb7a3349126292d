//! Error types used by the procvisor runtime, its supervisors and probes.
//!
//! The enums follow the failure taxonomy of the runtime:
//!
//! - [`BuildError`]: the declared service graph is malformed; fatal, raised before any spawn.
//! - [`SpawnError`]: one instance could not be launched; isolated to its service.
//! - [`ServiceError`]: lifecycle failures of one [`ProcessSupervisor`](crate::ProcessSupervisor).
//! - [`HealthCheckError`]: a probe failed or is misconfigured.
//! - [`ConfigError`]: the manifest could not be loaded.
//! - [`RuntimeError`]: errors raised by the [`Controller`](crate::Controller) itself.
//!
//! Every enum provides `as_label` (a short stable snake_case label for logs).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced while turning the flat service list into a forest.
///
/// Any of these aborts boot before a single process is spawned.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Two services share the same name.
    #[error("service {name:?} is declared more than once")]
    DuplicateService {
        /// The duplicated name.
        name: String,
    },

    /// A `requires` or `dependents` entry names a service that is not declared.
    #[error("service {service:?} references undeclared service {reference:?}")]
    UnresolvedReference {
        /// The service holding the reference.
        service: String,
        /// The name that could not be resolved.
        reference: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle {
        /// Names along the cycle; the first name is repeated at the end.
        path: Vec<String>,
    },
}

impl BuildError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::BuildError;
    ///
    /// let err = BuildError::Cycle { path: vec!["a".into(), "b".into(), "a".into()] };
    /// assert_eq!(err.as_label(), "build_cycle");
    /// assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BuildError::DuplicateService { .. } => "build_duplicate_service",
            BuildError::UnresolvedReference { .. } => "build_unresolved_reference",
            BuildError::Cycle { .. } => "build_cycle",
        }
    }
}

/// # Errors produced while launching a single process instance.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// An environment file could not be read.
    #[error("failed to load env file {path:?}: {source}")]
    EnvFile {
        /// Path of the env file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stdio redirection target could not be opened.
    #[error("failed to open stdio target {path:?}: {source}")]
    Stdio {
        /// Path of the redirection target.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to start the executable (missing binary, permissions, bad working dir).
    #[error("failed to spawn {program:?}: {source}")]
    Os {
        /// The executable that failed to start.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process started but its pid could not be observed (it was reaped immediately).
    #[error("spawned {program:?} but no pid was reported")]
    MissingPid {
        /// The executable that was started.
        program: PathBuf,
    },
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::EnvFile { .. } => "spawn_env_file",
            SpawnError::Stdio { .. } => "spawn_stdio",
            SpawnError::Os { .. } => "spawn_os",
            SpawnError::MissingPid { .. } => "spawn_missing_pid",
        }
    }
}

/// # Errors produced by a service supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Instance `instance` of the service could not be spawned.
    #[error("instance {instance} failed to start: {source}")]
    Spawn {
        /// Zero-based instance id.
        instance: usize,
        /// Why spawning failed.
        #[source]
        source: SpawnError,
    },

    /// The restart policy refused another attempt.
    #[error("restart limit exceeded after {attempts} attempts")]
    RestartExhausted {
        /// Number of restart attempts already made.
        attempts: u32,
    },

    /// Some instances could not be stopped, not even with SIGKILL.
    #[error("failed to stop instances {instances:?}")]
    Stop {
        /// Ids of the instances still alive.
        instances: Vec<usize>,
    },

    /// The supervisor was shut down and accepts no more work.
    #[error("supervisor is shut down")]
    Closed,
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::ServiceError;
    ///
    /// let err = ServiceError::RestartExhausted { attempts: 3 };
    /// assert_eq!(err.as_label(), "service_restart_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Spawn { .. } => "service_spawn",
            ServiceError::RestartExhausted { .. } => "service_restart_exhausted",
            ServiceError::Stop { .. } => "service_stop",
            ServiceError::Closed => "service_closed",
        }
    }
}

/// # Errors produced by health probes.
///
/// Probe failures are retryable; configuration errors are not.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HealthCheckError {
    /// The health-check block is incomplete (missing address, empty command, ...).
    #[error("invalid health check config: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The output matcher is not a valid regular expression.
    #[error("invalid regex pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },

    /// A single probe attempt exceeded its timeout.
    #[error("probe timed out after {timeout:?}")]
    Timeout {
        /// The per-attempt timeout.
        timeout: Duration,
    },

    /// TCP connection to the probe address failed.
    #[error("connect to {address} failed: {source}")]
    Connect {
        /// Probe address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// HTTP probe failed (transport error or non-success status).
    #[error("http probe {url} failed: {reason}")]
    Http {
        /// Probed URL.
        url: String,
        /// Transport error or status line.
        reason: String,
    },

    /// Probe command exited with a code outside the accepted set.
    #[error("probe command exited with {code:?}")]
    UnexpectedExit {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },

    /// Probe command output did not match the configured pattern.
    #[error("output does not match expected pattern: {pattern}")]
    OutputMismatch {
        /// The pattern that did not match.
        pattern: String,
    },

    /// Probe command could not be executed.
    #[error("probe command failed: {0}")]
    Io(#[from] std::io::Error),

    /// The check was interrupted by cancellation.
    #[error("health check cancelled")]
    Canceled,
}

impl HealthCheckError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HealthCheckError::InvalidConfig { .. } => "health_invalid_config",
            HealthCheckError::InvalidPattern { .. } => "health_invalid_pattern",
            HealthCheckError::Timeout { .. } => "health_timeout",
            HealthCheckError::Connect { .. } => "health_connect",
            HealthCheckError::Http { .. } => "health_http",
            HealthCheckError::UnexpectedExit { .. } => "health_unexpected_exit",
            HealthCheckError::OutputMismatch { .. } => "health_output_mismatch",
            HealthCheckError::Io(_) => "health_io",
            HealthCheckError::Canceled => "health_canceled",
        }
    }

    /// Indicates whether another attempt could succeed.
    ///
    /// Configuration errors and cancellation are final.
    ///
    /// # Example
    /// ```
    /// use procvisor::HealthCheckError;
    ///
    /// assert!(HealthCheckError::UnexpectedExit { code: Some(1) }.is_retryable());
    /// assert!(!HealthCheckError::InvalidConfig { reason: "no address".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            HealthCheckError::InvalidConfig { .. }
                | HealthCheckError::InvalidPattern { .. }
                | HealthCheckError::Canceled
        )
    }
}

/// # Errors produced while loading a manifest file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path:?}: {source}")]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML document is invalid.
    #[error("invalid toml in {path:?}: {source}")]
    Toml {
        /// Manifest path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// The JSON document is invalid.
    #[error("invalid json in {path:?}: {source}")]
    Json {
        /// Manifest path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// The file extension is neither `.toml` nor `.json`.
    #[error("unsupported manifest format {path:?} (expected .toml or .json)")]
    UnsupportedFormat {
        /// Manifest path.
        path: PathBuf,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Toml { .. } => "config_toml",
            ConfigError::Json { .. } => "config_json",
            ConfigError::UnsupportedFormat { .. } => "config_unsupported_format",
        }
    }
}

/// # Errors produced by the procvisor runtime.
///
/// These represent failures in the orchestration system itself: a graph that
/// cannot be booted, or a shutdown sequence exceeding its grace period.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The service graph is malformed; nothing was started.
    #[error("boot aborted: {0}")]
    Build(#[from] BuildError),

    /// Shutdown grace period was exceeded; some services did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of services that did not stop in time.
        stuck: Vec<String>,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Build(_) => "runtime_build",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }

    /// Returns a human-readable message with details about the error.
    ///
    /// ```
    /// use procvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded {
    ///     grace: Duration::from_secs(5),
    ///     stuck: vec!["db".into()],
    /// };
    /// assert_eq!(err.as_message(), r#"grace exceeded after 5s; stuck services=["db"]"#);
    /// ```
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::Build(e) => format!("build failed: {e}"),
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck services={stuck:?}")
            }
            RuntimeError::Signal(e) => format!("signal setup failed: {e}"),
        }
    }
}
