//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (runtime.rs):
//!     Bind every endpoint → Serve (fatal on any bind failure)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Refuse queued → Drain in-flight → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Listeners are bound before anything is served
//! - In-flight connections are never cut off; they finish on their own terms

pub mod runtime;
pub mod shutdown;
pub mod signals;

pub use runtime::ProxyRuntime;
pub use shutdown::{Shutdown, ShutdownSignal};
