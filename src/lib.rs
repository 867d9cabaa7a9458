//! Forward HTTP/HTTPS Proxy Library
//!
//! Plain requests are relayed to the origin named in the request; `CONNECT`
//! requests become opaque byte tunnels. Each connection carries one request.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use lifecycle::{ProxyRuntime, Shutdown};
pub use observability::{AccessLogRecord, AccessRecorder};
