//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] completes on the first of:
//! - `SIGINT` (Ctrl-C)
//! - `SIGTERM` (what a container runtime sends to PID 1)
//! - `SIGQUIT`
//!
//! Non-unix builds only listen for Ctrl-C.

/// Waits for a termination signal.
///
/// Each call installs its own listeners; `Err` means they could not be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    tracing::info!(signal = name, "termination signal");
    Ok(())
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
