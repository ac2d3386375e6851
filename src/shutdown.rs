//! Cooperative cancellation for polls and watches.
//!
//! A [`ShutdownController`] owns the sending side; every task, poller and
//! watch holds a cloned [`ShutdownSignal`] and races its waits against it with
//! `tokio::select!`. The flag is sticky: signals cloned after shutdown was
//! requested observe it immediately.

use crate::error::{DeployError, Result};
use std::time::Duration;
use tokio::sync::watch;

/// Sending side of the cancellation flag
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_tx: watch::Sender<bool>,
}

/// Receiving side, cheap to clone
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    shutdown_rx: watch::Receiver<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            shutdown_rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Request cancellation of every in-flight wait
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// A signal that never fires, for callers without a controller
    pub fn never() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // The receiver keeps the last value after the sender is dropped
        drop(shutdown_tx);
        Self { shutdown_rx }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Resolves once shutdown has been requested. Never resolves if the
    /// controller is dropped without requesting it.
    pub async fn cancelled(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let sender_dropped = shutdown_rx.wait_for(|requested| *requested).await.is_err();
        if sender_dropped {
            futures::future::pending::<()>().await;
        }
    }

    /// Fail fast when shutdown was already requested
    pub fn check(&self) -> Result<()> {
        if self.is_shutdown() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless shutdown is requested first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(DeployError::Cancelled),
        }
    }
}
