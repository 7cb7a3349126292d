//! # Lifecycle events broadcast over the [`Bus`].
//!
//! An [`Event`] is emitted either by the engine (the controller) or by a service
//! supervisor. Its state is a **bitmask**, so a listener can accept several
//! states with one mask:
//!
//! ```text
//! EngineStatus   UP        0b001
//!                SHUTDOWN  0b010
//!
//! ServiceStatus  ANY       0b000000   matches every service event
//!                UP        0b000001
//!                READY     0b000010   (dependencies satisfied)
//!                STARTED   0b000101   UP | 0b100
//!                HEALTHY   0b001001   UP | 0b1000
//!                DOWN      0b010000
//!                UNHEALTHY 0b100001   UP | 0b100000
//! ```
//!
//! A state matches a listen mask when `state & listen == listen`; every bit the
//! listener asks for must be present. `STARTED` and `HEALTHY` both carry `UP`,
//! so listening for `UP` accepts either.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, ServiceStatus};
//!
//! let ev = Event::service("db", ServiceStatus::HEALTHY).with_reason("probe passed");
//!
//! assert!(ev.status.matches(ServiceStatus::UP));
//! assert!(ev.status.matches(ServiceStatus::HEALTHY));
//! assert!(!ev.status.matches(ServiceStatus::DOWN));
//! assert_eq!(ev.service.as_deref(), Some("db"));
//! ```

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use super::Broadcaster;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// The event bus shared by supervisors, the scheduler and subscribers.
pub type Bus = Broadcaster<Event>;

/// Who emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// The controller (engine-wide state).
    Engine,
    /// A single service supervisor.
    Service,
}

/// Engine state bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EngineStatus(u16);

impl EngineStatus {
    /// No flag set.
    pub const NONE: Self = Self(0);
    /// All services were handed to the scheduler.
    pub const UP: Self = Self(0b001);
    /// Shutdown was requested.
    pub const SHUTDOWN: Self = Self(0b010);

    /// Returns the raw bits.
    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns `true` when every bit of `listen` is set in `self`.
    #[inline]
    pub const fn matches(self, listen: Self) -> bool {
        self.0 & listen.0 == listen.0
    }
}

impl BitOr for EngineStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UP => f.write_str("up"),
            Self::SHUTDOWN => f.write_str("shutdown"),
            Self::NONE => f.write_str("none"),
            other => write!(f, "{:#05b}", other.0),
        }
    }
}

/// Service state bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ServiceStatus(u16);

impl ServiceStatus {
    /// Empty mask; as a listen mask it accepts every service event.
    pub const ANY: Self = Self(0);
    /// Process is up.
    pub const UP: Self = Self(0b000001);
    /// Every prerequisite is healthy; the service is being launched.
    pub const READY: Self = Self(0b000010);
    /// All instances spawned.
    pub const STARTED: Self = Self(0b000100 | Self::UP.0);
    /// Health check passed (or one-shot run completed).
    pub const HEALTHY: Self = Self(0b001000 | Self::UP.0);
    /// Service stopped or failed.
    pub const DOWN: Self = Self(0b010000);
    /// Health check retries exhausted; the process keeps running.
    pub const UNHEALTHY: Self = Self(0b100000 | Self::UP.0);

    /// Returns the raw bits.
    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns `true` when every bit of `listen` is set in `self`.
    #[inline]
    pub const fn matches(self, listen: Self) -> bool {
        self.0 & listen.0 == listen.0
    }
}

impl BitOr for ServiceStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::ANY => "any",
            Self::UP => "up",
            Self::READY => "ready",
            Self::STARTED => "started",
            Self::HEALTHY => "healthy",
            Self::DOWN => "down",
            Self::UNHEALTHY => "unhealthy",
            other => return write!(f, "{:#08b}", other.0),
        };
        f.write_str(name)
    }
}

/// Immutable lifecycle event.
///
/// Construct with [`Event::engine`] or [`Event::service`]; the sequence number
/// and timestamp are assigned at construction.
#[derive(Debug, Clone)]
pub struct Event {
    /// Global monotonic sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Emitter of the event.
    pub source: EventSource,
    /// Engine state (meaningful when `source == Engine`).
    pub engine: EngineStatus,
    /// Service state (meaningful when `source == Service`).
    pub status: ServiceStatus,
    /// Originating service name (service events only).
    pub service: Option<Arc<str>>,
    /// Human-readable detail (error message, exit status, ...).
    pub reason: Option<Arc<str>>,
}

impl Event {
    fn new(source: EventSource) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            source,
            engine: EngineStatus::NONE,
            status: ServiceStatus::ANY,
            service: None,
            reason: None,
        }
    }

    /// Creates an engine event.
    #[must_use]
    pub fn engine(status: EngineStatus) -> Self {
        let mut ev = Self::new(EventSource::Engine);
        ev.engine = status;
        ev
    }

    /// Creates a service event.
    #[must_use]
    pub fn service(name: impl Into<Arc<str>>, status: ServiceStatus) -> Self {
        let mut ev = Self::new(EventSource::Service);
        ev.status = status;
        ev.service = Some(name.into());
        ev
    }

    /// Attaches a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns `true` for a service event named `name` whose state matches `listen`.
    pub fn is_service(&self, name: &str, listen: ServiceStatus) -> bool {
        self.source == EventSource::Service
            && self.service.as_deref() == Some(name)
            && self.status.matches(listen)
    }
}

/// Events are identified by their sequence number.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Event {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_and_healthy_carry_up() {
        assert!(ServiceStatus::STARTED.matches(ServiceStatus::UP));
        assert!(ServiceStatus::HEALTHY.matches(ServiceStatus::UP));
        assert!(ServiceStatus::UNHEALTHY.matches(ServiceStatus::UP));
        assert!(!ServiceStatus::DOWN.matches(ServiceStatus::UP));
        assert!(!ServiceStatus::READY.matches(ServiceStatus::UP));
    }

    #[test]
    fn any_matches_everything_but_specific_masks_do_not() {
        for s in [
            ServiceStatus::READY,
            ServiceStatus::STARTED,
            ServiceStatus::HEALTHY,
            ServiceStatus::DOWN,
        ] {
            assert!(s.matches(ServiceStatus::ANY));
        }
        assert!(!ServiceStatus::STARTED.matches(ServiceStatus::HEALTHY));
        assert!(!ServiceStatus::UNHEALTHY.matches(ServiceStatus::HEALTHY));
        assert!(ServiceStatus::HEALTHY.matches(ServiceStatus::UP | ServiceStatus::HEALTHY));
    }

    #[test]
    fn engine_masks() {
        assert!(EngineStatus::UP.matches(EngineStatus::UP));
        assert!(!EngineStatus::SHUTDOWN.matches(EngineStatus::UP));
        assert!((EngineStatus::UP | EngineStatus::SHUTDOWN).matches(EngineStatus::SHUTDOWN));
    }

    #[test]
    fn seq_is_monotonic() {
        let a = Event::engine(EngineStatus::UP);
        let b = Event::service("x", ServiceStatus::DOWN);
        assert!(b.seq > a.seq);
        assert!(b.is_service("x", ServiceStatus::DOWN));
        assert!(!b.is_service("y", ServiceStatus::DOWN));
        assert!(!a.is_service("x", ServiceStatus::ANY));
    }

    #[test]
    fn display_names() {
        assert_eq!(ServiceStatus::HEALTHY.to_string(), "healthy");
        assert_eq!(EngineStatus::SHUTDOWN.to_string(), "shutdown");
    }
}
