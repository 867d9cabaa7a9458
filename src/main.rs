//! Forward HTTP/HTTPS proxy.
//!
//! ```text
//!     Client ──▶ ListenerGroup ──▶ queue ──▶ admission ──▶ RequestDispatcher
//!                (per endpoint)   (bounded)   (shared)        │
//!                                                     CONNECT │ other
//!                                                  ┌──────────┴──────────┐
//!                                                  ▼                     ▼
//!                                            TunnelEngine           RelayEngine
//!                                                  │                     │
//!                                                  └──── OriginDialer ───┴──▶ Origin
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use forward_proxy::config::{load_config, ProxyConfig};
use forward_proxy::lifecycle::ProxyRuntime;
use forward_proxy::observability::logging::LoggingError;
use forward_proxy::observability::{
    init_logging, metrics, AccessRecorder, JsonLinesRecorder, TracingRecorder, STARTUP_TARGET,
};

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP/HTTPS proxy", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/proxy.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if cli.check {
        println!("{}: configuration is valid", cli.config.display());
        return ExitCode::SUCCESS;
    }

    let _logging = match init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        target: STARTUP_TARGET,
        config = %cli.config.display(),
        endpoints = config.endpoints.len(),
        max_concurrent = config.admission.max_concurrent,
        "forward-proxy v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (recorder, _access_guard) = match access_recorder(&config) {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(target: STARTUP_TARGET, error = %e, "Failed to open access log");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match ProxyRuntime::bind(&config, recorder).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(target: STARTUP_TARGET, error = %e, "Failed to start listeners");
            return ExitCode::FAILURE;
        }
    };

    runtime.run().await;
    ExitCode::SUCCESS
}

/// Access records go to `access.log` when a log directory is configured,
/// otherwise onto the `access` tracing target.
fn access_recorder(config: &ProxyConfig) -> Result<(Arc<dyn AccessRecorder>, Option<WorkerGuard>), LoggingError> {
    if config.log.log_dir.is_empty() {
        return Ok((Arc::new(TracingRecorder), None));
    }
    let (recorder, guard) = JsonLinesRecorder::open(Path::new(&config.log.log_dir))?;
    Ok((Arc::new(recorder), Some(guard)))
}
