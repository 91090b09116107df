//! Shutdown signal handling
//!
//! SIGTERM and SIGINT stop the scheduler through the same `stop()` path as a
//! normal shutdown.

use crate::scheduler::UpdateScheduler;
use std::sync::Weak;
use tracing::{info, warn};

/// Wait for SIGINT; pends forever if the handler cannot be registered
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to register SIGINT handler: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Spawn the shutdown listener for `scheduler`.
///
/// The listener holds a weak reference so it never keeps a dropped
/// scheduler alive.
pub fn spawn_shutdown_handler(scheduler: Weak<UpdateScheduler>) {
    tokio::spawn(async move {
        info!("Shutdown handler registered - listening for SIGTERM/SIGINT");

        tokio::select! {
            _ = interrupt() => info!("SIGINT received - stopping update scheduler"),
            _ = terminate() => info!("SIGTERM received - stopping update scheduler"),
        }

        match scheduler.upgrade() {
            Some(scheduler) => {
                scheduler.stop().await;
                scheduler.signal_listener_finished();
            }
            None => warn!("Shutdown signal received but the scheduler is gone"),
        }
    });
}
