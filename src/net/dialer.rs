//! Outbound connections to origin servers.
//!
//! Every relayed request and every tunnel gets a fresh connection; nothing
//! is pooled or reused. The caller owns closing the returned stream.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("connect to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("connect to {target} failed: {source}")]
    Io { target: String, source: io::Error },
}

/// Opens TCP connections with a hard connect timeout.
#[derive(Debug, Clone, Copy)]
pub struct OriginDialer {
    connect_timeout: Duration,
}

impl OriginDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Connect to `target` (`host:port`, IPv6 hosts bracketed).
    pub async fn dial(&self, target: &str) -> Result<TcpStream, DialError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| DialError::Timeout {
                target: target.to_string(),
                after: self.connect_timeout,
            })?
            .map_err(|source| DialError::Io {
                target: target.to_string(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(target_addr = %target, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_listening_origin() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = OriginDialer::new(Duration::from_secs(1));
        let stream = dialer.dial(&addr.to_string()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = OriginDialer::new(Duration::from_secs(1));
        let err = dialer.dial(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, DialError::Io { .. }));
    }

    #[tokio::test]
    async fn unresolvable_host_is_io_error() {
        let dialer = OriginDialer::new(Duration::from_secs(5));
        let err = dialer.dial("no-such-host.invalid:80").await.unwrap_err();
        assert!(matches!(err, DialError::Io { .. }));
    }
}
