//! `CONNECT` tunnels.
//!
//! # Responsibilities
//! - Dial the requested authority and confirm with the literal
//!   `200 Connection Established` line
//! - Pump opaque bytes in both directions until either side is done
//!
//! # Design Decisions
//! - Each direction runs under a deadline: fixed at start (`absolute`) or
//!   pushed back after every chunk (`idle`)
//! - The first direction to finish shuts down its destination and stops the
//!   other direction at its next read, so the tunnel tears down as a unit
//! - The recorded byte count is what the origin delivered to the client

use std::io;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TunnelDeadline;
use crate::http::request::RequestHead;
use crate::http::response::{send_status, CONNECT_ESTABLISHED};
use crate::net::connection::ConnectionId;
use crate::net::dialer::OriginDialer;
use crate::observability::access_log::AccessLogRecord;
use crate::observability::metrics;

const COPY_BUFFER: usize = 16 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct TunnelEngine {
    dialer: OriginDialer,
    timeout: Duration,
    deadline: TunnelDeadline,
}

/// How one direction of a tunnel ended.
#[derive(Debug)]
enum PipeEnd {
    Eof,
    Stopped,
    DeadlineExceeded,
    Failed(io::Error),
}

impl TunnelEngine {
    pub fn new(dialer: OriginDialer, timeout: Duration, deadline: TunnelDeadline) -> Self {
        Self {
            dialer,
            timeout,
            deadline,
        }
    }

    /// Serve a `CONNECT` request. Bytes the client already sent past the
    /// request head are still in `client`'s buffer and go to the origin first.
    pub async fn serve<C>(
        &self,
        id: ConnectionId,
        request: &RequestHead,
        mut client: BufReader<C>,
        record: &mut AccessLogRecord,
    ) where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(target) = request.tunnel_authority() else {
            tracing::warn!(connection_id = %id, "CONNECT request names no target");
            record.status_code = StatusCode::BAD_REQUEST.as_u16();
            send_status(&mut client, StatusCode::BAD_REQUEST, "Missing target host").await;
            return;
        };

        tracing::debug!(connection_id = %id, target = %target, "Opening tunnel");

        let origin = match self.dialer.dial(&target).await {
            Ok(origin) => origin,
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Failed to connect to tunnel target");
                metrics::record_dial_failure();
                record.status_code = StatusCode::BAD_GATEWAY.as_u16();
                send_status(&mut client, StatusCode::BAD_GATEWAY, "Failed to connect to target").await;
                return;
            }
        };

        let confirmed = async {
            client.write_all(CONNECT_ESTABLISHED).await?;
            client.flush().await
        }
        .await;
        if let Err(e) = confirmed {
            tracing::error!(connection_id = %id, error = %e, "Failed to confirm tunnel to client");
            record.status_code = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
            return;
        }
        record.status_code = StatusCode::OK.as_u16();
        tracing::debug!(connection_id = %id, target = %target, "Tunnel established");

        let early_data = client.buffer().to_vec();
        let (client_read, client_write) = tokio::io::split(client.into_inner());
        let (origin_read, origin_write) = origin.into_split();
        let stop = CancellationToken::new();

        let (upstream, downstream) = tokio::join!(
            self.pipe(id, "client->origin", &early_data, client_read, origin_write, &stop),
            self.pipe(id, "origin->client", &[], origin_read, client_write, &stop),
        );

        record.bytes_transferred = downstream;
        tracing::debug!(
            connection_id = %id,
            target = %target,
            bytes_up = upstream,
            bytes_down = downstream,
            "Tunnel closed"
        );
    }

    /// Copy `src` into `dst` until EOF, error, deadline, or `stop`. Returns
    /// the number of bytes written to `dst`.
    async fn pipe<R, W>(
        &self,
        id: ConnectionId,
        direction: &'static str,
        prefix: &[u8],
        mut src: R,
        mut dst: W,
        stop: &CancellationToken,
    ) -> u64
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut copied = 0u64;
        let end = self.pump(prefix, &mut src, &mut dst, stop, &mut copied).await;

        match &end {
            PipeEnd::Failed(e) if !is_disconnect(e) => {
                tracing::warn!(connection_id = %id, direction, error = %e, "Tunnel copy failed");
            }
            _ => tracing::debug!(connection_id = %id, direction, outcome = ?end, bytes = copied, "Tunnel direction finished"),
        }

        stop.cancel();
        let _ = tokio::time::timeout(self.timeout, dst.shutdown()).await;
        copied
    }

    async fn pump<R, W>(
        &self,
        prefix: &[u8],
        src: &mut R,
        dst: &mut W,
        stop: &CancellationToken,
        copied: &mut u64,
    ) -> PipeEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut deadline = Instant::now() + self.timeout;
        if !prefix.is_empty() {
            if let Err(end) = write_before(deadline, dst, prefix).await {
                return end;
            }
            *copied += prefix.len() as u64;
        }

        let mut buf = vec![0u8; COPY_BUFFER];
        loop {
            let read = tokio::select! {
                _ = stop.cancelled() => return PipeEnd::Stopped,
                read = tokio::time::timeout_at(deadline, src.read(&mut buf)) => read,
            };
            let n = match read {
                Ok(Ok(0)) => return PipeEnd::Eof,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return PipeEnd::Failed(e),
                Err(_) => return PipeEnd::DeadlineExceeded,
            };
            if let Err(end) = write_before(deadline, dst, &buf[..n]).await {
                return end;
            }
            *copied += n as u64;
            if self.deadline == TunnelDeadline::Idle {
                deadline = Instant::now() + self.timeout;
            }
        }
    }
}

async fn write_before<W>(deadline: Instant, dst: &mut W, bytes: &[u8]) -> Result<(), PipeEnd>
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout_at(deadline, dst.write_all(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PipeEnd::Failed(e)),
        Err(_) => Err(PipeEnd::DeadlineExceeded),
    }
}

/// Peer went away; expected at the end of most tunnels.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}
