//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (leveled events: console, service.log, startup.log)
//!     → access_log.rs (one AccessLogRecord per admitted connection)
//!     → metrics.rs (counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - Connection ID flows through every log line of a connection
//! - The access sink is injected as a trait object, never a global
//! - Metrics are cheap (atomic increments)

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessLogRecord, AccessRecorder, CollectingRecorder, JsonLinesRecorder, TracingRecorder};
pub use logging::{init_logging, LoggingGuard, STARTUP_TARGET};
