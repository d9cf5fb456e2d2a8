use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates server shutdown from OS signals or a programmatic trigger.
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve on ctrl-c, SIGTERM, or [`signal_shutdown`](Self::signal_shutdown).
    pub async fn wait_for_shutdown(&self) -> Result<(), std::io::Error> {
        if self.is_shutting_down() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
                _ = self.token.cancelled() => {},
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = self.token.cancelled() => {},
            }
        }

        self.token.cancel();
        tracing::info!("Shutting down gracefully...");
        Ok(())
    }

    pub fn signal_shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
