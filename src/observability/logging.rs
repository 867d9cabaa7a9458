//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Route startup events and service events to their own files
//! - Configure log level from config, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - File writers are non-blocking; the returned guard flushes them on drop
//! - Startup events are tagged with [`STARTUP_TARGET`]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

/// Target for lifecycle events that belong in `startup.log`.
pub const STARTUP_TARGET: &str = "forward_proxy::startup";

pub const ACCESS_LOG_FILE: &str = "access.log";
pub const SERVICE_LOG_FILE: &str = "service.log";
pub const STARTUP_LOG_FILE: &str = "startup.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to open log file {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: tracing_appender::rolling::InitError,
    },

    #[error("invalid log level {0:?}")]
    Level(String),

    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Parse a configured level name. `notice` has no tracing equivalent and maps to info.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" | "notice" => Some(LevelFilter::INFO),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

/// Keeps the non-blocking file writers alive. Dropping it flushes and closes them.
#[derive(Default)]
pub struct LoggingGuard {
    workers: Vec<WorkerGuard>,
}

impl LoggingGuard {
    fn push(&mut self, guard: WorkerGuard) {
        self.workers.push(guard);
    }
}

/// Open `<log_dir>/<name>` for appending behind a non-blocking writer.
pub fn open_log_file(log_dir: &Path, name: &str) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(log_dir)
        .map_err(|source| LoggingError::Open {
            path: log_dir.join(name),
            source,
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

pub fn ensure_log_dir(log_dir: &Path) -> Result<(), LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
        path: log_dir.to_path_buf(),
        source,
    })
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard, LoggingError> {
    let level =
        parse_level(&config.min_level).ok_or_else(|| LoggingError::Level(config.min_level.clone()))?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let mut guard = LoggingGuard::default();

    let console = config
        .enable_console
        .then(|| fmt::layer().with_target(false));

    let (service, startup) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        let dir = Path::new(&config.log_dir);
        ensure_log_dir(dir)?;

        let (service_writer, service_guard) = open_log_file(dir, SERVICE_LOG_FILE)?;
        let (startup_writer, startup_guard) = open_log_file(dir, STARTUP_LOG_FILE)?;
        guard.push(service_guard);
        guard.push(startup_guard);

        let service = fmt::layer()
            .with_ansi(false)
            .with_writer(service_writer)
            .with_filter(filter_fn(|meta| meta.target() != STARTUP_TARGET));
        let startup = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(startup_writer)
            .with_filter(filter_fn(|meta| meta.target() == STARTUP_TARGET));
        (Some(service), Some(startup))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(service)
        .with(startup)
        .try_init()?;

    tracing::info!(
        target: STARTUP_TARGET,
        level = %level,
        log_dir = %config.log_dir,
        "Logging initialized"
    );

    Ok(guard)
}
