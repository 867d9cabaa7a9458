//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop per port, bounded hand-off queue)
//!     → admission.rs (shared token pool)
//!     → connection.rs (connection ID, owned stream)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     HTTP layer → dialer.rs (fresh connection per request, connect timeout)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Every admitted connection holds exactly one token until its task ends
//! - No outbound connection pooling

pub mod admission;
pub mod connection;
pub mod dialer;
pub mod listener;

pub use admission::{AdmissionController, AdmissionError, AdmissionToken};
pub use connection::{ConnectionId, InboundConnection};
pub use dialer::{DialError, OriginDialer};
pub use listener::{ListenerError, ListenerGroup};
