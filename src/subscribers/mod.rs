//! # Event subscribers.
//!
//! Observers of the event [`Bus`](crate::events::Bus) that must not slow the
//! publishers down: loggers, notifiers, metrics.
//!
//! ```text
//! Supervisor / Scheduler / Controller ── publish(Event) ──► Bus
//!                                                            │
//!                                            SubscriberSet listener
//!                                                 ┌──────────┼──────────┐
//!                                                 ▼          ▼          ▼
//!                                             LogWriter   Notifier    Custom
//! ```
//!
//! - [`Subscribe`] the trait to implement
//! - [`SubscriberSet`] per-subscriber queues and workers
//! - [`LogWriter`] built-in `tracing` renderer

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub use set::{LISTENER_DRAIN, SubscriberSet};
pub use subscriber::Subscribe;
