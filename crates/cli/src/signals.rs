//! Signal handling for graceful cancellation of a run.

use std::sync::atomic::Ordering;

use contribsync_core::ShutdownFlag;
use tracing::{info, warn};

/// Install handlers for SIGINT (Ctrl+C) and SIGTERM.
///
/// The returned flag flips to `true` on the first signal. The engine stops
/// issuing requests and keeps whatever it already replayed.
pub fn setup_signal_handlers() -> ShutdownFlag {
    let flag = ShutdownFlag::default();
    let flag_clone = flag.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        flag_clone.store(true, Ordering::SeqCst);
    });

    flag
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling run"),
        _ = terminate => info!("received SIGTERM, cancelling run"),
    }
}
