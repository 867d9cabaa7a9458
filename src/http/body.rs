//! HTTP/1.x message bodies.
//!
//! # Responsibilities
//! - Decide how a message body is delimited (RFC 9112 §6)
//! - Stream a body from one leg to the other with its framing intact,
//!   counting the entity bytes that reach the destination
//!
//! # Design Decisions
//! - Chunked bodies are forwarded as received (chunk lines, extensions and
//!   trailers included); only chunk payload counts toward the byte total
//! - The counter is updated after every write, so a failed copy still
//!   reports how much was delivered

use std::io;

use http::{Method, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::head::{tokens, Header, HeadError};

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: u64 = 8 * 1024;

/// How a message body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    /// Body runs until the sender closes the connection (responses only).
    UntilClose,
}

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("read failed: {0}")]
    Read(io::Error),

    #[error("write failed: {0}")]
    Write(io::Error),

    #[error("malformed chunked body: {0}")]
    Chunk(&'static str),
}

fn declared_length(headers: &[Header]) -> Result<Option<u64>, HeadError> {
    let mut length = None;
    for value in tokens(headers, "content-length") {
        // 1*DIGIT: no sign, no embedded whitespace.
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(HeadError::Framing("invalid Content-Length"));
        }
        let parsed: u64 = value
            .parse()
            .map_err(|_| HeadError::Framing("Content-Length out of range"))?;
        match length {
            Some(previous) if previous != parsed => {
                return Err(HeadError::Framing("conflicting Content-Length values"));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn is_chunked(codings: &[String]) -> bool {
    codings.last().map(String::as_str) == Some("chunked")
}

/// Framing of a request body.
pub fn request_framing(headers: &[Header]) -> Result<BodyFraming, HeadError> {
    let codings = tokens(headers, "transfer-encoding");
    if !codings.is_empty() {
        return if is_chunked(&codings) {
            Ok(BodyFraming::Chunked)
        } else {
            Err(HeadError::Framing("request transfer-coding is not chunked"))
        };
    }
    Ok(match declared_length(headers)? {
        Some(0) | None => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
    })
}

/// Framing of a response body, which depends on the request it answers.
pub fn response_framing(
    request_method: &Method,
    status: StatusCode,
    headers: &[Header],
) -> Result<BodyFraming, HeadError> {
    if request_method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyFraming::Empty);
    }

    let codings = tokens(headers, "transfer-encoding");
    if !codings.is_empty() {
        return Ok(if is_chunked(&codings) {
            BodyFraming::Chunked
        } else {
            BodyFraming::UntilClose
        });
    }
    Ok(match declared_length(headers)? {
        Some(0) => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
        None => BodyFraming::UntilClose,
    })
}

/// Stream one body from `reader` to `writer`. `delivered` grows by the
/// number of entity bytes written.
pub async fn copy_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    framing: BodyFraming,
    delivered: &mut u64,
) -> Result<(), BodyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::Empty => {}
        BodyFraming::Length(n) => copy_exact(reader, writer, n, delivered).await?,
        BodyFraming::UntilClose => copy_to_end(reader, writer, delivered).await?,
        BodyFraming::Chunked => copy_chunked(reader, writer, delivered).await?,
    }
    writer.flush().await.map_err(BodyError::Write)
}

async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, mut remaining: u64, delivered: &mut u64) -> Result<(), BodyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while remaining > 0 {
        let buf = reader.fill_buf().await.map_err(BodyError::Read)?;
        if buf.is_empty() {
            return Err(BodyError::Read(io::ErrorKind::UnexpectedEof.into()));
        }
        let n = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        writer.write_all(&buf[..n]).await.map_err(BodyError::Write)?;
        reader.consume(n);
        remaining -= n as u64;
        *delivered += n as u64;
    }
    Ok(())
}

async fn copy_to_end<R, W>(reader: &mut R, writer: &mut W, delivered: &mut u64) -> Result<(), BodyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let buf = reader.fill_buf().await.map_err(BodyError::Read)?;
        if buf.is_empty() {
            return Ok(());
        }
        let n = buf.len();
        writer.write_all(buf).await.map_err(BodyError::Write)?;
        reader.consume(n);
        *delivered += n as u64;
    }
}

async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<(), BodyError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    (&mut *reader)
        .take(MAX_CHUNK_LINE)
        .read_until(b'\n', line)
        .await
        .map_err(BodyError::Read)?;
    if line.is_empty() {
        return Err(BodyError::Read(io::ErrorKind::UnexpectedEof.into()));
    }
    if !line.ends_with(b"\n") {
        return Err(BodyError::Chunk("line too long or truncated"));
    }
    Ok(())
}

fn chunk_size(line: &[u8]) -> Result<u64, BodyError> {
    // httparse reads an empty size as zero.
    if !line.first().is_some_and(u8::is_ascii_hexdigit) {
        return Err(BodyError::Chunk("invalid chunk size"));
    }
    match httparse::parse_chunk_size(line) {
        Ok(httparse::Status::Complete((consumed, size))) if consumed == line.len() => Ok(size),
        _ => Err(BodyError::Chunk("invalid chunk size")),
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W, delivered: &mut u64) -> Result<(), BodyError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(64);
    loop {
        read_line(reader, &mut line).await?;
        let size = chunk_size(&line)?;
        writer.write_all(&line).await.map_err(BodyError::Write)?;

        if size == 0 {
            // Trailer section, terminated by a blank line.
            loop {
                read_line(reader, &mut line).await?;
                writer.write_all(&line).await.map_err(BodyError::Write)?;
                if is_blank(&line) {
                    return Ok(());
                }
            }
        }

        copy_exact(reader, writer, size, delivered).await?;

        read_line(reader, &mut line).await?;
        if !is_blank(&line) {
            return Err(BodyError::Chunk("missing CRLF after chunk data"));
        }
        writer.write_all(&line).await.map_err(BodyError::Write)?;
    }
}
