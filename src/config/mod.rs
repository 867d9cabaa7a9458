//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → one ListenerGroup per ProxyEndpoint
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::AdmissionConfig;
pub use schema::ListenerConfig;
pub use schema::LogConfig;
pub use schema::ObservabilityConfig;
pub use schema::Protocol;
pub use schema::ProxyConfig;
pub use schema::ProxyEndpoint;
pub use schema::TimeoutConfig;
pub use schema::TunnelDeadline;
