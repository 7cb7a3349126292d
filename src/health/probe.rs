//! # Health probes.
//!
//! A [`Probe`] performs **one** reachability check. Timeouts, retries and
//! scheduling belong to [`HealthChecker`](super::HealthChecker).
//!
//! | kind | passes when |
//! |------|-------------|
//! | `http` | `GET address` returns a 2xx status |
//! | `tcp`  | a TCP connection to `address` is established |
//! | `cmd`  | the exit code is in `ok_codes` **and**, if set, `result_matcher` matches stdout + "\n" + stderr |
//!
//! Configuration is validated by [`build_probe`]: a missing address, an empty
//! command or a malformed regex is reported as a non-retryable error.

use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::config::{HealthCheckKind, HealthCheckSpec};
use crate::error::HealthCheckError;

/// One health probe.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Runs a single check.
    async fn probe(&self) -> Result<(), HealthCheckError>;

    /// Short kind name for logs.
    fn name(&self) -> &'static str;
}

/// Builds the probe described by `spec`.
pub fn build_probe(spec: &HealthCheckSpec) -> Result<Box<dyn Probe>, HealthCheckError> {
    match spec.kind {
        HealthCheckKind::Http => Ok(Box::new(HttpProbe::new(require_address(spec)?)?)),
        HealthCheckKind::Tcp => Ok(Box::new(TcpProbe::new(require_address(spec)?))),
        HealthCheckKind::Cmd => Ok(Box::new(CommandProbe::new(
            spec.command.clone(),
            spec.ok_codes.clone(),
            spec.result_matcher.as_deref(),
        )?)),
    }
}

fn require_address(spec: &HealthCheckSpec) -> Result<String, HealthCheckError> {
    spec.address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| HealthCheckError::InvalidConfig {
            reason: format!("{:?} health check requires an address", spec.kind),
        })
}

/// HTTP GET probe.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    /// Creates a probe for `address`; `http://` is assumed when no scheme is given.
    pub fn new(address: impl Into<String>) -> Result<Self, HealthCheckError> {
        let address = address.into();
        let url = if address.contains("://") {
            address
        } else {
            format!("http://{address}")
        };
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HealthCheckError::InvalidConfig {
                reason: format!("http client: {e}"),
            })?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> Result<(), HealthCheckError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| HealthCheckError::Http {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(HealthCheckError::Http {
                url: self.url.clone(),
                reason: format!("status {status}"),
            })
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// TCP connect probe.
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    /// Creates a probe for `host:port`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self) -> Result<(), HealthCheckError> {
        TcpStream::connect(self.address.as_str())
            .await
            .map(drop)
            .map_err(|source| HealthCheckError::Connect {
                address: self.address.clone(),
                source,
            })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Command probe.
pub struct CommandProbe {
    command: Vec<String>,
    ok_codes: Vec<i32>,
    matcher: Option<Regex>,
}

impl CommandProbe {
    /// Creates a command probe; the pattern is compiled here.
    pub fn new(
        command: Vec<String>,
        ok_codes: Vec<i32>,
        matcher: Option<&str>,
    ) -> Result<Self, HealthCheckError> {
        if command.first().map_or(true, |p| p.is_empty()) {
            return Err(HealthCheckError::InvalidConfig {
                reason: "cmd health check requires a command".to_owned(),
            });
        }
        let matcher = matcher
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| HealthCheckError::InvalidPattern {
                    pattern: pattern.to_owned(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self {
            command,
            ok_codes,
            matcher,
        })
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn probe(&self) -> Result<(), HealthCheckError> {
        let output = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let code = output.status.code();
        if !code.is_some_and(|c| self.ok_codes.contains(&c)) {
            return Err(HealthCheckError::UnexpectedExit { code });
        }

        if let Some(matcher) = &self.matcher {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Separator only between two non-empty streams, never trailing.
            let combined = if stdout.is_empty() || stderr.is_empty() {
                format!("{stdout}{stderr}")
            } else {
                format!("{stdout}\n{stderr}")
            };
            if !matcher.is_match(&combined) {
                debug!(pattern = matcher.as_str(), output = %combined, "probe output does not match");
                return Err(HealthCheckError::OutputMismatch {
                    pattern: matcher.as_str().to_owned(),
                });
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cmd"
    }
}

/// Stands in for a probe whose configuration is invalid; always fails.
pub(crate) struct InvalidProbe {
    pub(crate) reason: String,
}

#[async_trait]
impl Probe for InvalidProbe {
    async fn probe(&self) -> Result<(), HealthCheckError> {
        Err(HealthCheckError::InvalidConfig {
            reason: self.reason.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "invalid"
    }
}
