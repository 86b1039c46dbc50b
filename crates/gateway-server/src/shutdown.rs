//! Graceful shutdown signal handling.
//!
//! Grounded in `spark_hosting::shutdown::GracefulShutdownCoordinator`'s
//! shape (trigger, then wait up to a deadline, then force) but collapsed to
//! this process's single shutdown target — the [`crate::Supervisor`] — since
//! there is no second long-lived component here to register separately.

use std::sync::Arc;
use std::time::Duration;

use crate::Supervisor;

/// Resolves once on Ctrl-C or, on Unix, `SIGTERM` — whichever arrives first.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Waits for a shutdown signal, then drives the supervisor's own drain
/// logic (spec §4.1: "waits up to the deadline for writer mailboxes to
/// drain, then cancels. Failure to drain is logged, not fatal").
pub async fn run_until_shutdown(supervisor: Arc<Supervisor>, drain_deadline: Duration) {
    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining connections");
    supervisor.shutdown(drain_deadline).await;
}
