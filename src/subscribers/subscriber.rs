//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for observers of the event bus
//! (loggers, notifiers, metrics).
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Per-subscriber bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (a panicking handler is logged and the worker keeps going)
//!
//! ```text
//! Bus ──► SubscriberSet ──► [bounded queue] ──► worker task ──► subscriber.on_event()
//! ```
//!
//! ## Rules
//! - A slow subscriber only affects its own queue.
//! - Queue overflow drops the event **for this subscriber only**.
//! - Events are processed sequentially (FIFO) per subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use procvisor::{Event, ServiceStatus, Subscribe};
//!
//! struct DownAlert;
//!
//! #[async_trait]
//! impl Subscribe for DownAlert {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.status.matches(ServiceStatus::DOWN) {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "down-alert" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Observer of bus events.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, from the subscriber's own worker task.
    async fn on_event(&self, event: &Event);

    /// Name used in logs. The default is the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity; clamped to at least 1.
    ///
    /// Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
