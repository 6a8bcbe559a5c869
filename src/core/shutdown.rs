//! # OS termination signals.
//!
//! [`shutdown_signal`] completes with the name of the first termination
//! signal received.
//!
//! - Unix: `SIGINT`, `SIGTERM`, `SIGQUIT`
//! - elsewhere: Ctrl-C
//!
//! If listeners cannot be registered the future never completes; shutdown is
//! then only possible through the control handle.

use std::future::pending;

/// Waits for a termination signal and returns its name.
#[cfg(unix)]
pub(crate) async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let listeners = (|| {
        Ok::<_, std::io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
            signal(SignalKind::quit())?,
        ))
    })();
    let (mut sigint, mut sigterm, mut sigquit) = match listeners {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(error = %e, "cannot install signal handlers");
            return pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    }
}

/// Waits for a termination signal and returns its name.
#[cfg(not(unix))]
pub(crate) async fn shutdown_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            tracing::warn!(error = %e, "cannot install ctrl-c handler");
            pending().await
        }
    }
}
