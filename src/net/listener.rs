//! TCP listener groups with backpressure.
//!
//! # Responsibilities
//! - Bind every port of one configured endpoint
//! - Accept connections and hand them to a bounded queue
//! - Admit queued connections through the shared token pool and spawn a
//!   task per connection
//! - On shutdown: stop accepting, refuse what is still queued, and wait for
//!   in-flight connections to finish
//!
//! # Design Decisions
//! - One accept loop per port, one consumer per group
//! - A full queue blocks the accept loops, which leaves further clients in
//!   the kernel backlog
//! - Rejected clients get a best-effort status response, never an access record
//! - Rejections run on the connection tracker, so a lingering client never
//!   stalls admission and the drain still waits for them

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

use crate::config::{Protocol, ProxyEndpoint};
use crate::http::response::send_status;
use crate::http::RequestDispatcher;
use crate::lifecycle::ShutdownSignal;
use crate::net::admission::{AdmissionController, AdmissionError};
use crate::net::connection::InboundConnection;
use crate::observability::{metrics, STARTUP_TARGET};

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// How long a rejected client's unread input is drained before closing.
const REJECT_LINGER: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
}

/// The listeners of one configured endpoint.
#[derive(Debug)]
pub struct ListenerGroup {
    protocol: Protocol,
    listeners: Vec<TcpListener>,
    queue_capacity: usize,
}

impl ListenerGroup {
    /// Bind every port of `endpoint` on `bind_host`. Port 0 binds an
    /// ephemeral port; read it back with [`ListenerGroup::local_addrs`].
    pub async fn bind(
        endpoint: &ProxyEndpoint,
        bind_host: &str,
        queue_capacity: usize,
    ) -> Result<Self, ListenerError> {
        let mut listeners = Vec::with_capacity(endpoint.ports.len());
        for port in &endpoint.ports {
            let addr = format!("{bind_host}:{port}");
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|source| ListenerError::Bind {
                    addr: addr.clone(),
                    source,
                })?;

            match listener.local_addr() {
                Ok(local) => tracing::info!(
                    target: STARTUP_TARGET,
                    protocol = %endpoint.protocol,
                    address = %local,
                    "Listener bound"
                ),
                Err(e) => tracing::warn!(address = %addr, error = %e, "Failed to read bound address"),
            }
            listeners.push(listener);
        }

        Ok(Self {
            protocol: endpoint.protocol,
            listeners,
            queue_capacity,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Addresses actually bound, in port order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Serve until `shutdown` fires, then drain. Returns once every accept
    /// loop has stopped and every admitted connection has finished.
    pub async fn run(
        self,
        dispatcher: Arc<RequestDispatcher>,
        admission: AdmissionController,
        shutdown: ShutdownSignal,
    ) {
        let protocol = self.protocol;
        let (queue, mut pending) = mpsc::channel(self.queue_capacity);

        let mut accept_loops = JoinSet::new();
        for listener in self.listeners {
            accept_loops.spawn(accept_loop(listener, protocol, queue.clone(), shutdown.clone()));
        }
        drop(queue);

        let tracker = TaskTracker::new();
        loop {
            let conn = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                conn = pending.recv() => match conn {
                    Some(conn) => conn,
                    None => break,
                },
            };

            match admission.acquire(&shutdown).await {
                Ok(token) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    tracker.spawn(async move { dispatcher.serve(conn, token).await });
                }
                Err(e) => {
                    tracker.spawn(reject(conn, e));
                }
            }
        }

        while let Some(joined) = accept_loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(protocol = %protocol, error = %e, "Accept loop panicked");
            }
        }

        // Anything still queued was accepted but never admitted.
        pending.close();
        while let Some(conn) = pending.recv().await {
            tracker.spawn(reject(conn, AdmissionError::ShuttingDown));
        }

        tracker.close();
        tracing::info!(protocol = %protocol, in_flight = tracker.len(), "Draining connections");
        tracker.wait().await;
        tracing::info!(protocol = %protocol, "Listener group stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    protocol: Protocol,
    queue: mpsc::Sender<InboundConnection>,
    shutdown: ShutdownSignal,
) {
    let local = match listener.local_addr() {
        Ok(local) => local,
        Err(e) => {
            tracing::error!(protocol = %protocol, error = %e, "Listener has no local address");
            return;
        }
    };

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(address = %local, error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        metrics::record_accepted(protocol.as_str());
        let conn = InboundConnection::new(stream, peer, local, protocol);
        tracing::debug!(connection_id = %conn.id, peer = %peer, address = %local, "Connection accepted");

        let slot = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                reject(conn, AdmissionError::ShuttingDown).await;
                break;
            }
            slot = queue.reserve() => slot,
        };
        match slot {
            Ok(slot) => slot.send(conn),
            Err(_) => break,
        }
    }

    tracing::debug!(address = %local, "Accept loop stopped");
}

async fn reject(mut conn: InboundConnection, err: AdmissionError) {
    tracing::warn!(
        connection_id = %conn.id,
        peer = %conn.peer,
        reason = err.reason(),
        "Connection rejected"
    );
    metrics::record_rejected(err.reason());
    send_status(&mut conn.stream, err.status(), &err.to_string()).await;
    linger_close(&mut conn.stream).await;
}

/// Half-close, then discard whatever the client already sent. Closing with
/// unread input would reset the connection and lose the response.
async fn linger_close(stream: &mut TcpStream) {
    if stream.shutdown().await.is_err() {
        return;
    }
    let mut sink = [0u8; 1024];
    let drain = async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(REJECT_LINGER, drain).await;
}
