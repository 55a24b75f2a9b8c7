//! Cancellation token and signal handling for graceful shutdown
//!
//! A [`ShutdownController`] owns the stop flag; every readiness poll and
//! shard worker holds a [`ShutdownToken`] and observes the flag at its
//! suspension points. On shutdown, in-flight polls return promptly and
//! workers proceed to their final checkpoint instead of pulling new
//! batches. A checkpoint already in flight is allowed to finish on its own
//! schedule.

use log::info;
use std::fmt;
use tokio::sync::watch;

/// The OS signal that requested termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT - user interrupt (Ctrl+C)
    Interrupt,
    /// SIGTERM - termination request (kill, Kubernetes, Docker)
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT (Ctrl+C)"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Owner side of the stop flag.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        ShutdownController { tx }
    }

    /// Hand out a token observing this controller.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle observing a [`ShutdownController`]. A dropped
/// controller counts as a shutdown request, so waiters never hang.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow_and_update() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            if *rx.borrow() {
                return;
            }
        }
    }

    /// A token that is never cancelled. Useful where a wait should run out
    /// its full budget, as in tests.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the token's life.
        std::mem::forget(tx);
        ShutdownToken { rx }
    }
}

/// Wait for SIGINT or SIGTERM and report which one arrived.
#[cfg(unix)]
pub async fn shutdown_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM - initiating graceful shutdown");
            ShutdownSignal::Terminate
        }
        _ = sigint.recv() => {
            info!("Received SIGINT (Ctrl+C) - initiating graceful shutdown");
            ShutdownSignal::Interrupt
        }
    }
}

/// Windows-compatible handler (only handles Ctrl+C).
#[cfg(not(unix))]
pub async fn shutdown_signal() -> ShutdownSignal {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received Ctrl+C - initiating graceful shutdown");
    ShutdownSignal::Interrupt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_token_observes_shutdown() {
        let controller = ShutdownController::new();
        let token = controller.token();
        assert!(!token.is_cancelled());

        controller.shutdown();
        assert!(token.is_cancelled());
        // Must resolve immediately once the flag is set.
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("cancelled() did not resolve after shutdown");
    }

    #[tokio::test]
    async fn test_dropped_controller_cancels_waiters() {
        let controller = ShutdownController::new();
        let token = controller.token();
        drop(controller);
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("cancelled() did not resolve after controller drop");
    }

    #[tokio::test]
    async fn test_never_token_stays_pending() {
        let token = ShutdownToken::never();
        let waited =
            tokio::time::timeout(Duration::from_millis(50), token.cancelled()).await;
        assert!(waited.is_err());
    }
}
