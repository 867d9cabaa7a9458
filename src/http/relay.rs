//! One-shot relay of a plain HTTP request.
//!
//! # Responsibilities
//! - Resolve the origin from the request and dial a fresh connection
//! - Forward the request head and body, then stream the origin's response
//!   back to the client
//! - Record the origin's status and the body bytes delivered
//!
//! # Design Decisions
//! - Failures before anything reached the client become a best-effort `502`
//! - Failures after the response head was forwarded only end the relay;
//!   the recorded status stays the origin's
//! - The origin connection is dropped (closed) on every return path

use http::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::http::body::{copy_body, request_framing, response_framing, BodyError};
use crate::http::head::HeadError;
use crate::http::request::RequestHead;
use crate::http::response::{read_response, send_status, ResponseHead};
use crate::net::connection::ConnectionId;
use crate::net::dialer::OriginDialer;
use crate::observability::access_log::AccessLogRecord;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to forward request head: {0}")]
    RequestHead(std::io::Error),

    #[error("failed to forward request body: {0}")]
    RequestBody(#[from] BodyError),

    #[error("failed to read origin response: {0}")]
    Response(#[from] HeadError),

    #[error("client went away during interim response: {0}")]
    Interim(std::io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RelayEngine {
    dialer: OriginDialer,
    max_header_bytes: usize,
}

impl RelayEngine {
    pub fn new(dialer: OriginDialer, max_header_bytes: usize) -> Self {
        Self {
            dialer,
            max_header_bytes,
        }
    }

    /// Relay `request` to its origin. `client` is the buffered client stream;
    /// any request body is still unread in it.
    pub async fn serve<C>(
        &self,
        id: ConnectionId,
        request: &RequestHead,
        client: &mut C,
        record: &mut AccessLogRecord,
    ) where
        C: AsyncBufRead + AsyncWrite + Unpin,
    {
        let Some(target) = request.relay_authority() else {
            tracing::warn!(connection_id = %id, target = %request.target, "Request names no origin host");
            record.status_code = StatusCode::BAD_REQUEST.as_u16();
            send_status(client, StatusCode::BAD_REQUEST, "Missing target host").await;
            return;
        };

        let framing = match request_framing(&request.headers) {
            Ok(framing) => framing,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Rejecting request with invalid framing");
                record.status_code = StatusCode::BAD_REQUEST.as_u16();
                send_status(client, StatusCode::BAD_REQUEST, "Invalid request framing").await;
                return;
            }
        };

        tracing::info!(connection_id = %id, method = %request.method, target = %target, "Relaying request");

        let origin = match self.dialer.dial(&target).await {
            Ok(origin) => origin,
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Failed to connect to origin");
                metrics::record_dial_failure();
                record.status_code = StatusCode::BAD_GATEWAY.as_u16();
                send_status(client, StatusCode::BAD_GATEWAY, "Failed to connect to target").await;
                return;
            }
        };
        let (origin_read, mut origin_write) = origin.into_split();
        let mut origin_reader = BufReader::new(origin_read);

        let exchange = async {
            origin_write
                .write_all(&request.upstream_head())
                .await
                .map_err(RelayError::RequestHead)?;
            copy_body(&mut *client, &mut origin_write, framing, &mut 0).await?;

            loop {
                let head = read_response(&mut origin_reader, self.max_header_bytes).await?;
                if !head.is_interim() {
                    return Ok::<ResponseHead, RelayError>(head);
                }
                tracing::debug!(connection_id = %id, status = head.status.as_u16(), "Forwarding interim response");
                client
                    .write_all(&head.downstream_head())
                    .await
                    .map_err(RelayError::Interim)?;
            }
        };

        let response = match exchange.await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(connection_id = %id, target = %target, error = %e, "Relay to origin failed");
                record.status_code = StatusCode::BAD_GATEWAY.as_u16();
                send_status(client, StatusCode::BAD_GATEWAY, "Failed to relay request").await;
                return;
            }
        };

        let framing = match response_framing(&request.method, response.status, &response.headers) {
            Ok(framing) => framing,
            Err(e) => {
                tracing::error!(connection_id = %id, target = %target, error = %e, "Origin response has invalid framing");
                record.status_code = StatusCode::BAD_GATEWAY.as_u16();
                send_status(client, StatusCode::BAD_GATEWAY, "Invalid response from target").await;
                return;
            }
        };

        record.status_code = response.status.as_u16();
        if let Err(e) = client.write_all(&response.downstream_head()).await {
            tracing::debug!(connection_id = %id, error = %e, "Client closed before response head was sent");
            return;
        }

        match copy_body(&mut origin_reader, client, framing, &mut record.bytes_transferred).await {
            Ok(()) => {
                tracing::debug!(
                    connection_id = %id,
                    status = record.status_code,
                    bytes = record.bytes_transferred,
                    "Relay complete"
                );
            }
            Err(BodyError::Write(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Client closed during response body");
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, target = %target, error = %e, "Origin response body truncated");
            }
        }
    }
}
