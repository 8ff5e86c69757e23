//! CLI surface and run-level wiring.
//!
//! [`run`] is extracted from `main` so integration tests can drive the whole
//! flow in-process; `main` only parses arguments, initialises tracing and
//! maps the result to an exit code.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::batch::{self, BatchConfig, BatchResult, DEFAULT_WORKERS};
use crate::dsn::Dsn;
use crate::upload::HttpUploader;

/// Upload crashpad reports to a Sentry-compatible ingest endpoint while
/// preserving the original crash timestamps.
#[derive(Parser)]
#[clap(
    name = "crashpad-uploader",
    version,
    about = "Batch-upload crashpad minidump reports, preserving original crash timestamps"
)]
pub struct Cli {
    /// Connection descriptor, e.g. https://key@ingest.example.com/42
    #[clap(long)]
    pub dsn: String,

    /// Directory containing crashpad reports (.dmp files), or a single report file
    #[clap(long, short = 'd')]
    pub directory: PathBuf,

    /// Number of parallel upload workers (1-20)
    #[clap(long, short = 'w', default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// List what would be uploaded without actually uploading
    #[clap(long)]
    pub dry_run: bool,

    /// Enable verbose (debug-level) logging
    #[clap(long, short = 'v')]
    pub verbose: bool,

    /// Also write log events to this file, in addition to stderr
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

/// Initialises the tracing subscriber. `RUST_LOG` wins when set; otherwise
/// `--verbose` selects debug over info. With `--log-file` events are written
/// to the file in addition to stderr.
pub fn init_tracing(verbose: bool, log_file: Option<&Path>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default_directive = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file.map(std::fs::File::create) {
        Some(Ok(file)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        Some(Err(e)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            warn!(error = %e, "failed to create log file, logging to stderr only");
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
}

/// Validates the descriptor, wires up cancellation and runs the batch.
///
/// Per-item upload failures are data in the returned [`BatchResult`], not
/// errors; only setup failures and interruption surface as `Err`.
pub async fn run(cli: Cli) -> Result<BatchResult> {
    let dsn = Dsn::parse(&cli.dsn).context("invalid DSN")?;

    info!(
        host = %dsn.host,
        project_id = %dsn.project_id,
        "crashpad uploader starting"
    );
    info!(
        directory = %cli.directory.display(),
        workers = cli.workers,
        dry_run = cli.dry_run,
        "run parameters"
    );
    if cli.dry_run {
        info!("DRY RUN MODE - no files will be uploaded");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping dispatch of new uploads");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let uploader = HttpUploader::new().context("failed to build HTTP client")?;
    let config = BatchConfig {
        workers: cli.workers,
        dry_run: cli.dry_run,
    };

    let result = batch::run(&dsn, &cli.directory, &config, &uploader, &cancel, None).await?;

    match serde_json::to_string_pretty(&result) {
        Ok(json) => tracing::debug!(json = %json, "batch result"),
        Err(e) => tracing::debug!(error = ?e, "failed to serialize batch result"),
    }

    if result.interrupted {
        anyhow::bail!(
            "upload interrupted by user ({} of {} artifacts completed)",
            result.succeeded + result.failed,
            result.candidates
        );
    }
    Ok(result)
}
