//! # Service declaration.
//!
//! [`ServiceSpec`] is the validated description of one service as produced by
//! the configuration layer. It is deserializable from any serde format and can
//! be built programmatically:
//!
//! ```rust
//! use procvisor::{ServiceKind, ServiceSpec};
//!
//! let spec = ServiceSpec::new("migrate", "/usr/bin/migrate")
//!     .with_args(["up"])
//!     .with_kind(ServiceKind::OneShot)
//!     .with_requires(["db"])
//!     .with_env("DATABASE_URL", "postgres://db/app")
//!     .without_env("PGPASSWORD");
//!
//! assert_eq!(spec.requires, vec!["db"]);
//! assert_eq!(spec.env.get("PGPASSWORD"), Some(&None));
//! ```
//!
//! ## Environment values
//! `env` maps a key to `Some(value)` (set) or `None` (explicitly unset, removes a
//! value inherited or read from an env file). In JSON an unset is `null`; TOML has
//! no null, so `false` is used. Numbers and `true` are stringified.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::HealthCheckSpec;
use crate::policies::RestartPolicy;

/// How the supervisor treats process exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub enum ServiceKind {
    /// Long-running; every exit not requested by a stop is restarted.
    #[default]
    #[serde(rename = "normal", alias = "ongoing")]
    Ongoing,
    /// Runs to completion once; failed runs are restarted per policy.
    #[serde(rename = "one-shot")]
    OneShot,
    /// Like one-shot, but each start request runs it again.
    #[serde(rename = "multi-shot")]
    MultiShot,
}

impl ServiceKind {
    /// Returns `true` for run-to-completion kinds.
    pub fn is_shot(self) -> bool {
        !matches!(self, ServiceKind::Ongoing)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceKind::Ongoing => "normal",
            ServiceKind::OneShot => "one-shot",
            ServiceKind::MultiShot => "multi-shot",
        })
    }
}

/// Where a standard stream of the service goes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioTarget {
    /// Share the supervisor's stream.
    #[default]
    Inherit,
    /// Discard.
    Null,
    /// Append to a file (created if missing).
    File(PathBuf),
}

/// Declaration of one service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// Unique service name.
    pub name: String,
    /// Disabled services are removed from the forest with their dependents.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path to the executable.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Explicit environment; `None` unsets a key.
    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: BTreeMap<String, Option<String>>,
    /// Dotenv files applied in order, before `env`.
    #[serde(default)]
    pub env_file: Vec<PathBuf>,
    /// Start from the supervisor's own environment.
    #[serde(default)]
    pub inherit_env: bool,
    /// Working directory; the supervisor's when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Number of identical instances.
    #[serde(default = "default_process_count")]
    pub process_count: usize,
    /// Restart backoff and limits.
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Graceful stop timeout before SIGKILL.
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    /// Exit handling.
    #[serde(default, rename = "type")]
    pub kind: ServiceKind,
    /// Dropped unless another service depends on it.
    #[serde(default)]
    pub lazy: bool,
    /// Optional periodic probe.
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
    /// Services that must be healthy before this one starts.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Services that wait for this one.
    #[serde(default)]
    pub dependents: Vec<String>,
    /// Standard output target.
    #[serde(default)]
    pub stdout: StdioTarget,
    /// Standard error target; follows `stdout` when unset.
    #[serde(default)]
    pub stderr: Option<StdioTarget>,
}

fn default_true() -> bool {
    true
}

fn default_process_count() -> usize {
    1
}

impl ServiceSpec {
    /// Creates an enabled ongoing service with defaults for everything else.
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            executable: executable.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            env_file: Vec::new(),
            inherit_env: false,
            working_dir: None,
            process_count: 1,
            restart: RestartPolicy::default(),
            timeout: None,
            kind: ServiceKind::Ongoing,
            lazy: false,
            health_check: None,
            requires: Vec::new(),
            dependents: Vec::new(),
            stdout: StdioTarget::Inherit,
            stderr: None,
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    /// Explicitly unsets one environment variable.
    #[must_use]
    pub fn without_env(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    /// Appends an env file.
    #[must_use]
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file.push(path.into());
        self
    }

    /// Enables environment passthrough.
    #[must_use]
    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the number of instances.
    #[must_use]
    pub fn with_process_count(mut self, count: usize) -> Self {
        self.process_count = count;
        self
    }

    /// Sets the restart policy.
    #[must_use]
    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Sets the graceful stop timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the service kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ServiceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the lazy flag.
    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Attaches a health check.
    #[must_use]
    pub fn with_health_check(mut self, check: HealthCheckSpec) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Sets the prerequisites.
    #[must_use]
    pub fn with_requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the declared dependents.
    #[must_use]
    pub fn with_dependents<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependents = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets stdout, and stderr unless set separately.
    #[must_use]
    pub fn with_stdout(mut self, target: StdioTarget) -> Self {
        self.stdout = target;
        self
    }

    /// Sets stderr.
    #[must_use]
    pub fn with_stderr(mut self, target: StdioTarget) -> Self {
        self.stderr = Some(target);
        self
    }

    /// Instances to run (at least 1).
    pub fn instance_count(&self) -> usize {
        self.process_count.max(1)
    }

    /// Effective stderr target.
    pub fn stderr_target(&self) -> &StdioTarget {
        self.stderr.as_ref().unwrap_or(&self.stdout)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvValue {
    Text(String),
    Flag(bool),
    Int(i64),
    Float(f64),
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<EnvValue>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                None | Some(EnvValue::Flag(false)) => None,
                Some(EnvValue::Flag(true)) => Some("true".to_owned()),
                Some(EnvValue::Text(s)) => Some(s),
                Some(EnvValue::Int(i)) => Some(i.to_string()),
                Some(EnvValue::Float(f)) => Some(f.to_string()),
            };
            (key, value)
        })
        .collect())
}
