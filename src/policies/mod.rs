//! Restart policies.
//!
//! This module holds the knob that controls **if/when** a failed service is
//! restarted and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RestartPolicy`] doubling backoff with a cap, optional attempt limit, accepted exit codes
//!
//! ## Quick wiring
//! ```text
//! ServiceSpec { restart: RestartPolicy, .. }
//!      └─► process::ProcessSupervisor uses:
//!           - restart.get_delay(attempt) to schedule or refuse the next attempt
//!           - restart.is_ok_exit(code) to classify one-shot exits
//! ```
//!
//! ## Defaults
//! - `delay = 1s`, `delay_max = 16s`, unlimited restarts, `ok_codes = [0]`.

mod restart;

pub use restart::{DEFAULT_RESTART_DELAY, DEFAULT_RESTART_DELAY_MAX, RestartPolicy};
