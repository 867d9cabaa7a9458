//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted connection
//!     → dispatcher.rs (read one request head, fill access record)
//!     → CONNECT: tunnel.rs (200 Connection Established, byte pump)
//!     → other:   relay.rs (forward request, stream response back)
//!     → access record emitted, token released
//! ```
//!
//! head.rs, request.rs, response.rs and body.rs hold the HTTP/1.x wire
//! format shared by both engines.

pub mod body;
pub mod dispatcher;
pub mod head;
pub mod relay;
pub mod request;
pub mod response;
pub mod tunnel;

pub use dispatcher::RequestDispatcher;
pub use request::{RequestHead, RequestKind};
