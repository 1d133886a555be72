//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal cancels the coordinator's token. Every run holds a child of that
//! token, so in-flight dump and load utilities are terminated and the run
//! ends with `Cancelled`.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown, for one run or one server
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Wait for SIGTERM or SIGINT, then cancel every issued token
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => {}
        }

        self.shutdown();
    }

    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Graceful shutdown initiated");
            self.token.cancel();
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_issued_tokens() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        coordinator.shutdown();
        handle.await.unwrap();
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelling_a_run_token_leaves_the_rest() {
        let coordinator = ShutdownCoordinator::new();
        let first = coordinator.token();
        let second = coordinator.token();

        first.cancel();
        assert!(!second.is_cancelled());
        assert!(!coordinator.token().is_cancelled());
    }
}
