//! Runtime events: types, broadcast bus and wait helpers.
//!
//! This module groups the event **data model**, the generic [`Broadcaster`]
//! used to fan events out, and the wait primitives built on top of it.
//!
//! ## Contents
//! - [`Event`], [`EventSource`], [`EngineStatus`], [`ServiceStatus`] event payload and bitmask states
//! - [`Broadcaster`], [`Subscription`], [`with_subscription`] fan-out primitive
//! - [`Bus`] the `Broadcaster<Event>` shared by the runtime
//! - [`wait_for_service`], [`wait_for_engine`] cancellable waits on the bus
//!
//! ## Quick reference
//! - **Publishers**: `Controller` (engine up/shutdown), `ProcessSupervisor`
//!   (started/healthy/unhealthy/down), `DependencyScheduler` (ready).
//! - **Consumers**: `DependencyScheduler` (healthy events unblock dependents),
//!   `SubscriberSet` (fans out to [`Subscribe`](crate::Subscribe) implementations),
//!   wait helpers.
//!
//! See `core/mod.rs` for the system-level wiring diagram.

mod broadcast;
mod event;
mod wait;

pub use broadcast::{
    Broadcaster, DEFAULT_SUBSCRIBER_CAPACITY, Subscription, with_subscription,
};
pub use event::{Bus, EngineStatus, Event, EventSource, ServiceStatus};
pub use wait::{WaitOutcome, wait_for_engine, wait_for_service};
