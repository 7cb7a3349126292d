//! Health-check configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default interval between probe cycles.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
/// Default timeout of a single probe attempt.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default attempts per probe cycle.
pub const DEFAULT_HEALTH_RETRIES: u32 = 3;

/// Probe kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// HTTP GET against `address`; any 2xx passes.
    Http,
    /// TCP connect to `address`.
    Tcp,
    /// Run `command`; exit code and optional output pattern decide.
    Cmd,
}

/// Periodic health probe of one service.
///
/// Fields not used by the selected kind are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckSpec {
    /// Probe kind.
    #[serde(rename = "type")]
    pub kind: HealthCheckKind,
    /// `host:port` (tcp) or URL (http). A bare `host:port` is probed over `http://`.
    #[serde(default)]
    pub address: Option<String>,
    /// Program and arguments (cmd).
    #[serde(default)]
    pub command: Vec<String>,
    /// Accepted exit codes of the command.
    #[serde(default = "default_ok_codes")]
    pub ok_codes: Vec<i32>,
    /// Regular expression the combined stdout/stderr must match.
    #[serde(default)]
    pub result_matcher: Option<String>,
    /// Pause between probe cycles.
    #[serde(default, with = "humantime_serde::option")]
    pub interval: Option<Duration>,
    /// Timeout of one attempt.
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    /// Attempts per cycle.
    #[serde(default)]
    pub retries: Option<u32>,
    /// Grace period after start before the first probe.
    #[serde(default, with = "humantime_serde::option")]
    pub start_period: Option<Duration>,
}

fn default_ok_codes() -> Vec<i32> {
    vec![0]
}

impl HealthCheckSpec {
    fn with_kind(kind: HealthCheckKind) -> Self {
        Self {
            kind,
            address: None,
            command: Vec::new(),
            ok_codes: default_ok_codes(),
            result_matcher: None,
            interval: None,
            timeout: None,
            retries: None,
            start_period: None,
        }
    }

    /// HTTP probe against `address`.
    pub fn http(address: impl Into<String>) -> Self {
        let mut spec = Self::with_kind(HealthCheckKind::Http);
        spec.address = Some(address.into());
        spec
    }

    /// TCP probe against `address`.
    pub fn tcp(address: impl Into<String>) -> Self {
        let mut spec = Self::with_kind(HealthCheckKind::Tcp);
        spec.address = Some(address.into());
        spec
    }

    /// Command probe.
    pub fn cmd<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = Self::with_kind(HealthCheckKind::Cmd);
        spec.command = command.into_iter().map(Into::into).collect();
        spec
    }

    /// Replaces the accepted exit codes.
    #[must_use]
    pub fn with_ok_codes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.ok_codes = codes.into();
        self
    }

    /// Sets the output pattern.
    #[must_use]
    pub fn with_matcher(mut self, pattern: impl Into<String>) -> Self {
        self.result_matcher = Some(pattern.into());
        self
    }

    /// Sets the interval between cycles.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the attempts per cycle.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the initial grace period.
    #[must_use]
    pub fn with_start_period(mut self, start_period: Duration) -> Self {
        self.start_period = Some(start_period);
        self
    }

    /// Interval, or [`DEFAULT_HEALTH_INTERVAL`]. Never zero.
    pub fn interval(&self) -> Duration {
        self.interval
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_HEALTH_INTERVAL)
    }

    /// Attempt timeout, or [`DEFAULT_HEALTH_TIMEOUT`]. Never zero.
    pub fn timeout(&self) -> Duration {
        self.timeout
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_HEALTH_TIMEOUT)
    }

    /// Attempts per cycle, or [`DEFAULT_HEALTH_RETRIES`]; at least 1.
    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_HEALTH_RETRIES).max(1)
    }

    /// Initial grace period (zero by default).
    pub fn start_period(&self) -> Duration {
        self.start_period.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let spec: HealthCheckSpec = toml::from_str("type = \"tcp\"\naddress = \"127.0.0.1:80\"").unwrap();
        assert_eq!(spec.kind, HealthCheckKind::Tcp);
        assert_eq!(spec.interval(), DEFAULT_HEALTH_INTERVAL);
        assert_eq!(spec.timeout(), DEFAULT_HEALTH_TIMEOUT);
        assert_eq!(spec.retries(), 3);
        assert_eq!(spec.start_period(), Duration::ZERO);
        assert_eq!(spec.ok_codes, vec![0]);
    }

    #[test]
    fn durations_and_command_parse() {
        let spec: HealthCheckSpec = serde_json::from_str(
            r#"{"type":"cmd","command":["pg_isready"],"ok_codes":[0,2],
                "result_matcher":"accepting","interval":"5s","timeout":"500ms",
                "retries":0,"start_period":"2s"}"#,
        )
        .unwrap();
        assert_eq!(spec.command, vec!["pg_isready"]);
        assert_eq!(spec.ok_codes, vec![0, 2]);
        assert_eq!(spec.interval(), Duration::from_secs(5));
        assert_eq!(spec.timeout(), Duration::from_millis(500));
        assert_eq!(spec.retries(), 1);
        assert_eq!(spec.start_period(), Duration::from_secs(2));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(toml::from_str::<HealthCheckSpec>("type = \"grpc\"").is_err());
    }
}
