//! Client request heads.
//!
//! # Responsibilities
//! - Parse the request line and header fields of one request
//! - Classify the request (`CONNECT` tunnel vs. plain relay)
//! - Resolve the origin authority and render the upstream head

use std::str::FromStr;

use http::{Method, Uri};
use tokio::io::AsyncBufRead;

use crate::http::head::{self, collect_headers, read_head, Header, HeadError, MAX_HEADERS};

/// How a request is served, decided once from its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// `CONNECT host:port`: opaque byte tunnel.
    Connect,
    /// Any other method: one-shot relay.
    Other,
}

impl RequestKind {
    pub fn of(method: &Method) -> Self {
        if method == Method::CONNECT {
            RequestKind::Connect
        } else {
            RequestKind::Other
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Connect => "tunnel",
            RequestKind::Other => "relay",
        }
    }
}

/// A parsed request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request-target exactly as sent.
    pub target: String,
    pub uri: Uri,
    /// Minor version of HTTP/1.x.
    pub version: u8,
    pub headers: Vec<Header>,
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self, HeadError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut slots);
        if req.parse(raw)?.is_partial() {
            return Err(HeadError::Incomplete);
        }

        let (Some(method), Some(target), Some(version)) = (req.method, req.path, req.version) else {
            return Err(HeadError::Incomplete);
        };
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| HeadError::InvalidMethod(method.to_string()))?;
        let uri = Uri::from_str(target).map_err(|_| HeadError::InvalidTarget(target.to_string()))?;

        Ok(Self {
            method,
            target: target.to_string(),
            uri,
            version,
            headers: collect_headers(req.headers),
        })
    }

    pub fn kind(&self) -> RequestKind {
        RequestKind::of(&self.method)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        head::find(&self.headers, name)
    }

    /// The `Host` field, if any.
    pub fn host(&self) -> Option<&str> {
        self.header("host").filter(|h| !h.is_empty())
    }

    /// `host[:port]` carried in the request-target (absolute- or
    /// authority-form). Userinfo is dropped; IPv6 hosts keep their brackets.
    pub fn uri_authority(&self) -> Option<String> {
        let authority = self.uri.authority()?;
        let host = authority.host();
        if host.is_empty() {
            return None;
        }
        Some(match authority.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// The authority the request is addressed to: request-target first, then `Host`.
    pub fn authority(&self) -> Option<String> {
        self.uri_authority()
            .or_else(|| self.host().map(str::to_string))
    }

    /// Path for logging; `CONNECT` requests have none.
    pub fn path(&self) -> &str {
        match self.kind() {
            RequestKind::Connect => "/",
            RequestKind::Other => self.uri.path(),
        }
    }

    /// `HTTP/1.x` as sent by the client.
    pub fn protocol(&self) -> String {
        format!("HTTP/1.{}", self.version)
    }

    /// Origin authority for a relay, defaulting to port 80.
    pub fn relay_authority(&self) -> Option<String> {
        self.authority().map(|a| with_default_port(&a, 80))
    }

    /// Origin authority for a tunnel, defaulting to port 443.
    pub fn tunnel_authority(&self) -> Option<String> {
        self.authority().map(|a| with_default_port(&a, 443))
    }

    /// Request-target in origin-form, as sent to the origin server.
    pub fn origin_form(&self) -> &str {
        if self.target == "*" {
            return "*";
        }
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }

    /// Render the head sent upstream: origin-form request line, the client's
    /// fields in their original order, `Host` added when the client sent none.
    pub fn upstream_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.origin_form().as_bytes());
        out.extend_from_slice(format!(" HTTP/1.{}\r\n", self.version).as_bytes());

        if self.host().is_none() {
            if let Some(authority) = self.uri_authority() {
                out.extend_from_slice(format!("Host: {authority}\r\n").as_bytes());
            }
        }
        let headers: Vec<Header> = self
            .headers
            .iter()
            .filter(|h| !(h.is("host") && h.value.is_empty()))
            .cloned()
            .collect();
        head::write_headers_for_next_hop(&mut out, &headers);
        out
    }
}

/// Read and parse one request head. `Ok(None)` means the client closed
/// before sending anything.
pub async fn read_request<R>(reader: &mut R, limit: usize) -> Result<Option<RequestHead>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    match read_head(reader, limit).await? {
        Some(raw) => RequestHead::parse(&raw).map(Some),
        None => Ok(None),
    }
}

/// Append `:port` unless the authority already names one.
pub fn with_default_port(authority: &str, port: u16) -> String {
    let has_port = match authority.rfind(']') {
        // Bracketed IPv6 literal: a port can only follow the bracket.
        Some(end) => authority[end..].contains(':'),
        None => authority.contains(':'),
    };
    if has_port {
        authority.to_string()
    } else {
        format!("{authority}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> RequestHead {
        RequestHead::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn classifies_by_method() {
        assert_eq!(parse("CONNECT example.com:443 HTTP/1.1\r\n\r\n").kind(), RequestKind::Connect);
        assert_eq!(parse("GET / HTTP/1.1\r\nHost: a\r\n\r\n").kind(), RequestKind::Other);
        assert_eq!(parse("POST http://a/ HTTP/1.0\r\n\r\n").kind(), RequestKind::Other);
    }

    #[test]
    fn relay_authority_prefers_request_target() {
        let req = parse("GET http://origin.test:8080/a?b=1 HTTP/1.1\r\nHost: other.test\r\n\r\n");
        assert_eq!(req.relay_authority().as_deref(), Some("origin.test:8080"));
        assert_eq!(req.origin_form(), "/a?b=1");
        assert_eq!(req.path(), "/a");
    }

    #[test]
    fn relay_authority_falls_back_to_host_with_port_80() {
        let req = parse("GET /index.html HTTP/1.1\r\nHost: origin.test\r\n\r\n");
        assert_eq!(req.relay_authority().as_deref(), Some("origin.test:80"));
    }

    #[test]
    fn relay_without_any_authority() {
        let req = parse("GET / HTTP/1.0\r\n\r\n");
        assert_eq!(req.relay_authority(), None);
    }

    #[test]
    fn tunnel_authority_defaults_to_443() {
        let req = parse("CONNECT secure.test HTTP/1.1\r\n\r\n");
        assert_eq!(req.tunnel_authority().as_deref(), Some("secure.test:443"));
        assert_eq!(req.path(), "/");

        let req = parse("CONNECT secure.test:8443 HTTP/1.1\r\nHost: secure.test:8443\r\n\r\n");
        assert_eq!(req.tunnel_authority().as_deref(), Some("secure.test:8443"));
    }

    #[test]
    fn tunnel_target_wins_over_host_header() {
        let req = parse("CONNECT a.test:443 HTTP/1.1\r\nHost: b.test:443\r\n\r\n");
        assert_eq!(req.tunnel_authority().as_deref(), Some("a.test:443"));
    }

    #[test]
    fn tunnel_falls_back_to_host_header() {
        // Origin-form target carries no authority.
        let req = parse("CONNECT / HTTP/1.1\r\nHost: b.test\r\n\r\n");
        assert_eq!(req.tunnel_authority().as_deref(), Some("b.test:443"));
    }

    #[test]
    fn userinfo_never_reaches_the_authority() {
        let req = parse("GET http://user:pw@origin.test/x HTTP/1.1\r\n\r\n");
        assert_eq!(req.uri_authority().as_deref(), Some("origin.test"));
        assert_eq!(req.relay_authority().as_deref(), Some("origin.test:80"));
        assert_eq!(
            String::from_utf8(req.upstream_head()).unwrap(),
            "GET /x HTTP/1.1\r\nHost: origin.test\r\nConnection: close\r\n\r\n"
        );

        let req = parse("GET http://u@[::1]:8080/ HTTP/1.1\r\n\r\n");
        assert_eq!(req.relay_authority().as_deref(), Some("[::1]:8080"));
    }

    #[test]
    fn default_port_handles_ipv6_literals() {
        assert_eq!(with_default_port("[::1]", 443), "[::1]:443");
        assert_eq!(with_default_port("[::1]:8443", 443), "[::1]:8443");
        assert_eq!(with_default_port("example.com", 80), "example.com:80");
    }

    #[test]
    fn upstream_head_uses_origin_form_and_keeps_fields() {
        let req = parse(
            "GET http://origin.test/p?q HTTP/1.1\r\nHost: origin.test\r\nUser-Agent: UA/1\r\nProxy-Connection: keep-alive\r\n\r\n",
        );
        assert_eq!(
            String::from_utf8(req.upstream_head()).unwrap(),
            "GET /p?q HTTP/1.1\r\nHost: origin.test\r\nUser-Agent: UA/1\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn upstream_head_adds_missing_host() {
        let req = parse("GET http://origin.test:81/ HTTP/1.0\r\n\r\n");
        assert_eq!(
            String::from_utf8(req.upstream_head()).unwrap(),
            "GET / HTTP/1.0\r\nHost: origin.test:81\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(RequestHead::parse(b"\x00\x01 nonsense\r\n\r\n").is_err());
        assert!(matches!(
            RequestHead::parse(b"GET / HTTP/1.1\r\n"),
            Err(HeadError::Incomplete)
        ));
    }

    #[tokio::test]
    async fn read_request_reports_clean_eof() {
        let mut reader = tokio::io::BufReader::new(&b""[..]);
        assert!(read_request(&mut reader, 1024).await.unwrap().is_none());
    }
}
