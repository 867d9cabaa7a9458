//! HTTP/1.x message heads shared by requests and responses.
//!
//! # Responsibilities
//! - Read a head (start line + header fields) through a buffered reader
//!   without consuming any body bytes
//! - Keep header names, values and order exactly as received
//! - Rewrite connection-scoped (hop-by-hop) fields for the next hop

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Upper bound on header fields per head.
pub const MAX_HEADERS: usize = 128;

#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection closed before the head was complete")]
    UnexpectedEof,

    #[error("head exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("malformed head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("incomplete head")]
    Incomplete,

    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error("invalid request target {0:?}")]
    InvalidTarget(String),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid message framing: {0}")]
    Framing(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One header field, kept byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok().map(str::trim)
    }
}

pub(crate) fn collect_headers(parsed: &[httparse::Header<'_>]) -> Vec<Header> {
    parsed
        .iter()
        .map(|h| Header::new(h.name, h.value))
        .collect()
}

/// First value of `name`, trimmed.
pub fn find<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers.iter().find(|h| h.is(name)).and_then(Header::value_str)
}

/// Every comma-separated token across all `name` fields, lowercased.
pub fn tokens(headers: &[Header], name: &str) -> Vec<String> {
    headers
        .iter()
        .filter(|h| h.is(name))
        .filter_map(Header::value_str)
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Read one head, up to and including its terminating blank line.
///
/// Returns `Ok(None)` when the stream ends before any byte arrives. Blank
/// lines ahead of the start line are skipped but count toward `limit`.
/// Bytes after the head stay in the reader's buffer.
pub async fn read_head<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    let mut skipped = 0;
    let mut seen_any = false;

    loop {
        let remaining = (limit + 1).saturating_sub(skipped + head.len()) as u64;
        let start = head.len();
        let n = (&mut *reader).take(remaining).read_until(b'\n', &mut head).await?;

        if n == 0 {
            return if seen_any {
                Err(HeadError::UnexpectedEof)
            } else {
                Ok(None)
            };
        }
        seen_any = true;

        if skipped + head.len() > limit {
            return Err(HeadError::TooLarge { limit });
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                skipped += head.len();
                head.clear();
                continue;
            }
            return Ok(Some(head));
        }
        if !line.ends_with(b"\n") {
            return Err(HeadError::UnexpectedEof);
        }
    }
}

const HOP_BY_HOP: [&str; 3] = ["connection", "proxy-connection", "keep-alive"];

/// Append `headers` to `out` for the next hop.
///
/// Connection-scoped fields are replaced by a single `Connection: close`:
/// each leg of the proxy carries exactly one message.
pub fn write_headers_for_next_hop(out: &mut Vec<u8>, headers: &[Header]) {
    let mut listed = tokens(headers, "connection");
    listed.extend(tokens(headers, "proxy-connection"));
    // Framing fields must survive: the body is forwarded with its original framing.
    listed.retain(|t| t != "transfer-encoding" && t != "content-length");

    for header in headers {
        let name = header.name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&name.as_str()) || listed.contains(&name) {
            continue;
        }
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(&header.value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");
}
