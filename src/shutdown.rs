//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] is triggered once, either by SIGINT/SIGTERM via
//! [`ShutdownSignal::watch_os_signals`] or programmatically, and every clone
//! observes it. The HTTP server hands [`ShutdownSignal::triggered`] to
//! axum's graceful shutdown so in-flight dispatches finish before exit.
//!
//! # Example
//!
//! ```rust,ignore
//! use bulker_dispatch::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! tokio::spawn(shutdown.clone().watch_os_signals());
//!
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(shutdown.clone().triggered_owned())
//!     .await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared, one-shot shutdown signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            info!("Shutdown triggered");
            let _ = self.sender.send(());
        }
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered, including before this call.
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = receiver.recv().await;
    }

    /// Owned variant of [`ShutdownSignal::triggered`] for `'static` futures.
    pub async fn triggered_owned(self) {
        self.triggered().await
    }

    /// Wait for SIGINT or SIGTERM, then trigger.
    ///
    /// If no handler can be installed, logs and waits for a programmatic
    /// trigger instead.
    pub async fn watch_os_signals(self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.triggered() => return,
        }

        self.trigger();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();

        let handle = tokio::spawn(async move { waiter.triggered().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_triggered_after_the_fact() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        assert!(signal.is_triggered());

        let result =
            tokio::time::timeout(Duration::from_millis(50), signal.clone().triggered_owned()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_not_triggered_by_default() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let result = tokio::time::timeout(Duration::from_millis(20), signal.triggered()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_watcher_exits_on_programmatic_trigger() {
        let signal = ShutdownSignal::new();
        let watcher = tokio::spawn(signal.clone().watch_os_signals());

        signal.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), watcher).await;
        assert!(result.is_ok());
    }
}
