//! Shutdown coordination for the proxy.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Coordinator for graceful shutdown.
///
/// A single broadcast signal that every accept loop, queue hand-off and
/// admission wait observes. Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            token: self.token.clone(),
        }
    }

    /// Trigger the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Receiving side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Resolves once shutdown has been triggered (immediately if it already was).
    pub fn recv(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}
