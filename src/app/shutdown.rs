use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Resolves on SIGINT or SIGTERM. If a handler cannot be installed the other
/// one is still honoured; with neither, this never resolves.
pub async fn wait_for_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                        ShutdownSignal::Interrupt
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                        ShutdownSignal::Terminate
                    }
                }
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                ShutdownSignal::Interrupt
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        ShutdownSignal::Interrupt
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to listen for SIGINT: {}", err);
        std::future::pending::<()>().await;
    }
}
