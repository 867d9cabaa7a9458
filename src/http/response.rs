//! Origin response heads and locally generated responses.

use http::StatusCode;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::http::head::{self, collect_headers, read_head, Header, HeadError, MAX_HEADERS};

/// Reply to a successful `CONNECT`, sent verbatim.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// A parsed response head.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Minor version of HTTP/1.x.
    pub version: u8,
    pub reason: String,
    pub headers: Vec<Header>,
}

impl ResponseHead {
    pub fn parse(raw: &[u8]) -> Result<Self, HeadError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut slots);
        if resp.parse(raw)?.is_partial() {
            return Err(HeadError::Incomplete);
        }

        let (Some(code), Some(version)) = (resp.code, resp.version) else {
            return Err(HeadError::Incomplete);
        };
        let status = StatusCode::from_u16(code).map_err(|_| HeadError::InvalidStatus(code))?;

        Ok(Self {
            status,
            version,
            reason: resp.reason.unwrap_or_default().to_string(),
            headers: collect_headers(resp.headers),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        head::find(&self.headers, name)
    }

    /// `1xx` other than `101`: the final response follows on the same connection.
    pub fn is_interim(&self) -> bool {
        self.status.is_informational() && self.status != StatusCode::SWITCHING_PROTOCOLS
    }

    /// Render the head sent to the client.
    pub fn downstream_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(
            format!("HTTP/1.{} {} {}\r\n", self.version, self.status.as_u16(), self.reason).as_bytes(),
        );
        if self.is_interim() {
            // Interim heads are passed through without hop-by-hop rewriting.
            for header in &self.headers {
                out.extend_from_slice(header.name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(&header.value);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"\r\n");
        } else {
            head::write_headers_for_next_hop(&mut out, &self.headers);
        }
        out
    }
}

/// Read and parse one response head from the origin.
pub async fn read_response<R>(reader: &mut R, limit: usize) -> Result<ResponseHead, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    match read_head(reader, limit).await? {
        Some(raw) => ResponseHead::parse(&raw),
        None => Err(HeadError::UnexpectedEof),
    }
}

/// A complete plain-text response with the given status.
pub fn status_response(status: StatusCode, message: &str) -> Vec<u8> {
    let reason = status.canonical_reason().unwrap_or("");
    let body = format!("{message}\n");
    format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nX-Content-Type-Options: nosniff\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        status.as_u16(),
        body.len(),
    )
    .into_bytes()
}

/// Best-effort write of a generated response. Failures are logged at debug
/// level and otherwise ignored: the connection is closing either way.
pub async fn send_status<W>(writer: &mut W, status: StatusCode, message: &str)
where
    W: AsyncWrite + Unpin,
{
    let response = status_response(status, message);
    let result = async {
        writer.write_all(&response).await?;
        writer.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!(status = status.as_u16(), error = %e, "Failed to send status response");
    }
}
