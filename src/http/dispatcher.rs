//! Per-connection request dispatch.
//!
//! # Responsibilities
//! - Read exactly one request head from an admitted connection
//! - Fill in the access record fields known from the head
//! - Hand the connection to the tunnel or relay engine by method
//! - Emit the access record once, after the connection is done
//!
//! # Design Decisions
//! - A panic while serving is caught here and recorded as `500`, so the
//!   record and the admission token are still released exactly once
//! - Malformed requests and silent clients are closed without a response

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::Instrument;

use crate::config::{Protocol, ProxyConfig};
use crate::http::relay::RelayEngine;
use crate::http::request::{read_request, RequestHead, RequestKind};
use crate::http::tunnel::TunnelEngine;
use crate::net::admission::AdmissionToken;
use crate::net::connection::{ConnectionId, InboundConnection};
use crate::net::dialer::OriginDialer;
use crate::observability::access_log::{AccessLogRecord, AccessRecorder};
use crate::observability::metrics;

/// Serves admitted connections. Shared by every listener group.
pub struct RequestDispatcher {
    relay: RelayEngine,
    tunnel: TunnelEngine,
    recorder: Arc<dyn AccessRecorder>,
    read_timeout: Option<Duration>,
    max_header_bytes: usize,
}

impl RequestDispatcher {
    pub fn new(config: &ProxyConfig, recorder: Arc<dyn AccessRecorder>) -> Self {
        let dialer = OriginDialer::new(config.timeouts.connect());
        let max_header_bytes = config.listener.max_header_bytes;
        Self {
            relay: RelayEngine::new(dialer, max_header_bytes),
            tunnel: TunnelEngine::new(
                dialer,
                config.timeouts.tunnel_idle(),
                config.timeouts.tunnel_deadline,
            ),
            recorder,
            read_timeout: config.timeouts.read_request(),
            max_header_bytes,
        }
    }

    /// Serve one admitted connection to completion. The token is released
    /// and the stream closed when this returns.
    pub async fn serve(&self, conn: InboundConnection, token: AdmissionToken) {
        let InboundConnection {
            id,
            stream,
            peer,
            protocol,
            ..
        } = conn;
        self.serve_stream(id, stream, peer, protocol, token).await;
    }

    async fn serve_stream<C>(
        &self,
        id: ConnectionId,
        stream: C,
        peer: SocketAddr,
        protocol: Protocol,
        token: AdmissionToken,
    ) where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("connection", id = %id, peer = %peer, protocol = %protocol);
        let mut record = AccessLogRecord::begin(&id, peer);

        let outcome = AssertUnwindSafe(self.dispatch(id, stream, &mut record))
            .catch_unwind()
            .instrument(span)
            .await;

        let kind = match outcome {
            Ok(kind) => kind,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(connection_id = %id, panic = %message, "Connection handler panicked");
                if record.status_code == 0 {
                    record.status_code = 500;
                }
                None
            }
        };

        record.finish();
        if let Some(kind) = kind {
            metrics::record_request(
                kind.as_str(),
                record.status_code,
                record.bytes_transferred,
                Duration::from_millis(record.duration_ms),
            );
        }
        self.recorder.record(record);
        drop(token);
    }

    /// Read the request and run the matching engine. Returns the request
    /// kind, or `None` when no request was read.
    pub async fn dispatch<C>(
        &self,
        id: ConnectionId,
        stream: C,
        record: &mut AccessLogRecord,
    ) -> Option<RequestKind>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client = BufReader::new(stream);
        let request = self.read(id, &mut client).await?;
        let kind = request.kind();
        describe(&request, record);

        match kind {
            RequestKind::Connect => self.tunnel.serve(id, &request, client, record).await,
            RequestKind::Other => self.relay.serve(id, &request, &mut client, record).await,
        }
        Some(kind)
    }

    async fn read<C>(&self, id: ConnectionId, client: &mut BufReader<C>) -> Option<RequestHead>
    where
        C: AsyncRead + Unpin,
    {
        let read = read_request(client, self.max_header_bytes);
        let result = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(connection_id = %id, "Timed out waiting for request");
                    return None;
                }
            },
            None => read.await,
        };

        match result {
            Ok(Some(request)) => Some(request),
            Ok(None) => {
                tracing::debug!(connection_id = %id, "Client closed before sending a request");
                None
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Failed to read client request");
                None
            }
        }
    }
}

/// Copy what the request head tells us into the access record.
fn describe(request: &RequestHead, record: &mut AccessLogRecord) {
    record.method = request.method.to_string();
    record.host = request.authority().unwrap_or_default();
    record.path = request.path().to_string();
    record.protocol = request.protocol();
    record.user_agent = request.header("user-agent").unwrap_or_default().to_string();
    record.referer = request.header("referer").unwrap_or_default().to_string();
    record.is_https = request.kind() == RequestKind::Connect;
}
