//! Bounded concurrency gate.
//!
//! A fixed pool of tokens shared by every listener group. A connection must
//! hold a token while it is processed; the token goes back to the pool when
//! it is dropped, however the connection's task ends.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// Shutdown fired before a token freed up.
    #[error("proxy is shutting down")]
    ShuttingDown,

    /// No token freed up within the configured acquire timeout.
    #[error("no capacity available")]
    Saturated,
}

impl AdmissionError {
    /// Status line sent to the rejected client.
    pub fn status(&self) -> http::StatusCode {
        match self {
            AdmissionError::ShuttingDown => http::StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Saturated => http::StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::ShuttingDown => "shutting_down",
            AdmissionError::Saturated => "saturated",
        }
    }
}

/// Fixed-size token pool.
///
/// Uses a semaphore to enforce the limit. When every token is out, acquirers
/// wait until one is returned, shutdown fires, or the acquire timeout passes.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Option<Duration>,
}

impl AdmissionController {
    pub fn new(capacity: usize, acquire_timeout: Option<Duration>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout,
        }
    }

    /// Wait for a token.
    pub async fn acquire(&self, shutdown: &ShutdownSignal) -> Result<AdmissionToken, AdmissionError> {
        if shutdown.is_triggered() {
            return Err(AdmissionError::ShuttingDown);
        }

        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = tokio::select! {
            biased;
            _ = shutdown.recv() => return Err(AdmissionError::ShuttingDown),
            permit = with_timeout(self.acquire_timeout, acquire) => permit,
        };

        match permit {
            // The semaphore is never closed, so an acquire error cannot come back.
            Some(Ok(permit)) => {
                metrics::connection_opened();
                Ok(AdmissionToken { _permit: permit })
            }
            Some(Err(_)) => Err(AdmissionError::ShuttingDown),
            None => Err(AdmissionError::Saturated),
        }
    }

    /// Get configured pool size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get current available tokens.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

async fn with_timeout<F: std::future::Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// One unit of processing capacity.
///
/// When dropped, the token is released back to the pool. This keeps the
/// pool size intact even if the connection handler panics.
#[derive(Debug)]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        metrics::connection_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn tokens_return_to_pool_on_drop() {
        let shutdown = Shutdown::new();
        let admission = AdmissionController::new(2, None);

        let first = admission.acquire(&shutdown.subscribe()).await.unwrap();
        let second = admission.acquire(&shutdown.subscribe()).await.unwrap();
        assert_eq!(admission.available(), 0);

        drop(first);
        assert_eq!(admission.available(), 1);
        drop(second);
        assert_eq!(admission.available(), admission.capacity());
    }

    #[tokio::test]
    async fn waiter_gets_token_when_one_frees() {
        let shutdown = Shutdown::new();
        let admission = AdmissionController::new(1, None);
        let held = admission.acquire(&shutdown.subscribe()).await.unwrap();

        let waiter = {
            let admission = admission.clone();
            let signal = shutdown.subscribe();
            tokio::spawn(async move { admission.acquire(&signal).await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert_eq!(admission.available(), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_waiting_acquire() {
        let shutdown = Shutdown::new();
        let admission = AdmissionController::new(1, None);
        let _held = admission.acquire(&shutdown.subscribe()).await.unwrap();

        let waiter = {
            let admission = admission.clone();
            let signal = shutdown.subscribe();
            tokio::spawn(async move { admission.acquire(&signal).await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();

        assert_eq!(waiter.await.unwrap(), Err(AdmissionError::ShuttingDown));
        assert_eq!(admission.available(), 0);
    }

    #[tokio::test]
    async fn acquire_after_shutdown_fails_even_with_capacity() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let admission = AdmissionController::new(4, None);
        let err = admission.acquire(&shutdown.subscribe()).await.unwrap_err();
        assert_eq!(err, AdmissionError::ShuttingDown);
        assert_eq!(err.status(), http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(admission.available(), 4);
    }

    #[tokio::test]
    async fn acquire_timeout_reports_saturation() {
        let shutdown = Shutdown::new();
        let admission = AdmissionController::new(1, Some(Duration::from_millis(30)));
        let _held = admission.acquire(&shutdown.subscribe()).await.unwrap();

        let err = admission.acquire(&shutdown.subscribe()).await.unwrap_err();
        assert_eq!(err, AdmissionError::Saturated);
        assert_eq!(err.status(), http::StatusCode::TOO_MANY_REQUESTS);
    }
}
