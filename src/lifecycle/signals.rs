//! OS signal handling.
//!
//! SIGTERM and SIGINT both request graceful shutdown. No other signal is handled.

use crate::observability::STARTUP_TARGET;

/// Resolves when the process is asked to terminate.
pub async fn termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!(target: STARTUP_TARGET, signal = "SIGINT", "Shutdown signal received"),
        () = terminate => tracing::info!(target: STARTUP_TARGET, signal = "SIGTERM", "Shutdown signal received"),
    }
}
