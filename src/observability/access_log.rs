//! Per-connection access records.
//!
//! A record is opened when a connection is admitted, filled in by the
//! dispatcher and the engines as facts become known, and handed to an
//! [`AccessRecorder`] exactly once when the connection is torn down.

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use crate::net::connection::ConnectionId;
use crate::observability::logging::{ensure_log_dir, open_log_file, LoggingError, ACCESS_LOG_FILE};

/// Structured summary of one connection's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogRecord {
    pub timestamp: DateTime<Utc>,
    pub connection_id: String,
    pub client_ip: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub protocol: String,
    pub user_agent: String,
    pub referer: String,
    pub is_https: bool,
    pub status_code: u16,
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    #[serde(skip)]
    started: Option<Instant>,
}

impl AccessLogRecord {
    /// Open a record for a freshly admitted connection.
    pub fn begin(id: &ConnectionId, peer: SocketAddr) -> Self {
        Self {
            timestamp: Utc::now(),
            connection_id: id.to_string(),
            client_ip: peer.to_string(),
            method: String::new(),
            host: String::new(),
            path: String::new(),
            protocol: String::new(),
            user_agent: String::new(),
            referer: String::new(),
            is_https: false,
            status_code: 0,
            bytes_transferred: 0,
            duration_ms: 0,
            started: Some(Instant::now()),
        }
    }

    /// Stamp the duration. Called once, right before the record is handed off.
    pub fn finish(&mut self) {
        if let Some(started) = self.started.take() {
            self.duration_ms = duration_millis(started.elapsed());
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Sink for finished access records.
pub trait AccessRecorder: Send + Sync {
    fn record(&self, record: AccessLogRecord);
}

/// Emits each record as JSON on the `access` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl AccessRecorder for TracingRecorder {
    fn record(&self, record: AccessLogRecord) {
        match record.to_json() {
            Ok(json) => tracing::info!(target: "access", "{json}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize access record"),
        }
    }
}

/// Appends one JSON object per line to `access.log`.
pub struct JsonLinesRecorder {
    writer: Mutex<NonBlocking>,
}

impl JsonLinesRecorder {
    /// Open `<log_dir>/access.log`. The guard flushes pending lines when dropped.
    pub fn open(log_dir: &Path) -> Result<(Self, WorkerGuard), LoggingError> {
        ensure_log_dir(log_dir)?;
        let (writer, guard) = open_log_file(log_dir, ACCESS_LOG_FILE)?;
        Ok((
            Self {
                writer: Mutex::new(writer),
            },
            guard,
        ))
    }
}

impl AccessRecorder for JsonLinesRecorder {
    fn record(&self, record: AccessLogRecord) {
        let mut line = match record.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize access record");
                return;
            }
        };
        line.push('\n');

        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writer.write_all(line.as_bytes()) {
            tracing::error!(error = %e, "Failed to write access record");
        }
    }
}

/// Keeps every record in memory. Useful for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct CollectingRecorder {
    records: Arc<Mutex<Vec<AccessLogRecord>>>,
}

impl CollectingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records emitted so far.
    pub fn records(&self) -> Vec<AccessLogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccessRecorder for CollectingRecorder {
    fn record(&self, record: AccessLogRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
