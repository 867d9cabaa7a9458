//! Accepted client connections.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and access records
//! - Carry the accepted stream and its addresses from the accept loop to
//!   the connection task that owns it
//!
//! The stream is closed when the owning task drops it, on every exit path.

use std::fmt;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::Protocol;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An accepted client connection waiting for, or holding, an admission token.
#[derive(Debug)]
pub struct InboundConnection {
    pub id: ConnectionId,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub local: SocketAddr,
    pub protocol: Protocol,
}

impl InboundConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr, local: SocketAddr, protocol: Protocol) -> Self {
        Self {
            id: ConnectionId::new(),
            stream,
            peer,
            local,
            protocol,
        }
    }
}
