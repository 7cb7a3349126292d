//! Boot orchestration.
//!
//! - [`Controller`] wires forest, scheduler, supervisors and subscribers together
//!   and drives graceful shutdown;
//! - [`ControllerBuilder`] configures it;
//! - [`wait_for_shutdown_signal`] cross-platform termination signal handling.

mod builder;
mod controller;
mod shutdown;

pub use builder::ControllerBuilder;
pub use controller::Controller;
pub use shutdown::wait_for_shutdown_signal;
