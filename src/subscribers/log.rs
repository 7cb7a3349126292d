//! # Logging subscriber.
//!
//! [`LogWriter`] renders bus events through `tracing` under the
//! `procvisor::events` target:
//!
//! ```text
//! INFO  procvisor::events: engine event status=up
//! INFO  procvisor::events: service event service=db status=healthy
//! WARN  procvisor::events: service event service=api status=down reason="instance 0 exit code 1"
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use super::Subscribe;
use crate::events::{Event, EventSource, ServiceStatus};

/// Logs every bus event; `DOWN` and `UNHEALTHY` at warn level.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let reason = e.reason.as_deref().unwrap_or_default();
        match e.source {
            EventSource::Engine => {
                info!(target: "procvisor::events", seq = e.seq, status = %e.engine, "engine event");
            }
            EventSource::Service => {
                let service = e.service.as_deref().unwrap_or_default();
                if e.status == ServiceStatus::DOWN || e.status == ServiceStatus::UNHEALTHY {
                    warn!(target: "procvisor::events", seq = e.seq, service, status = %e.status, reason, "service event");
                } else {
                    info!(target: "procvisor::events", seq = e.seq, service, status = %e.status, reason, "service event");
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_every_event_kind() {
        let writer = LogWriter;
        writer
            .on_event(&Event::engine(crate::events::EngineStatus::UP))
            .await;
        writer
            .on_event(&Event::service("db", ServiceStatus::DOWN).with_reason("exit code 1"))
            .await;
        assert_eq!(writer.name(), "log");
    }
}
