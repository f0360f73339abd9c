//! Signal-driven cancellation

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on SIGINT or SIGTERM (Ctrl+C or Ctrl+Break on Windows).
///
/// Must be called from within a tokio runtime.
pub fn install_signal_handlers(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers; falling back to Ctrl+C");
                ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, cancelling"),
        _ = sigint.recv() => info!("Received SIGINT, cancelling"),
    }
}

#[cfg(windows)]
async fn wait_for_signal() {
    use tokio::signal::windows;

    let (mut ctrl_c, mut ctrl_break) = match (windows::ctrl_c(), windows::ctrl_break()) {
        (Ok(c), Ok(b)) => (c, b),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install console handlers; falling back to Ctrl+C");
            self::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c.recv() => info!("Received Ctrl+C, cancelling"),
        _ = ctrl_break.recv() => info!("Received Ctrl+Break, cancelling"),
    }
}

#[cfg(not(any(unix, windows)))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, cancelling"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C; cancellation disabled");
            std::future::pending::<()>().await;
        }
    }
}
