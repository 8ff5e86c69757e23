//! Batch coordinator: scan, fan out, aggregate.
//!
//! Scans the reports directory for `.dmp` artifacts, then runs the
//! resolve → build → upload pipeline for each one on a bounded worker pool.
//! Workers yield [`UploadOutcome`] values through the stream; the coordinator
//! is the only owner of the counters, so aggregation needs no locks. One
//! artifact's failure never aborts the others.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dsn::Dsn;
use crate::endpoint;
use crate::metadata;
use crate::upload::{UploadOutcome, Uploader};

/// Crash-dump file extension matched during the directory scan.
pub const DUMP_EXTENSION: &str = "dmp";

/// Worker count used when the requested value is out of range.
pub const DEFAULT_WORKERS: usize = 4;
/// Upper bound on parallel upload workers.
pub const MAX_WORKERS: usize = 20;

/// Fatal scan failures; these abort the run before any upload starts.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("reports path '{0}' does not exist")]
    NotFound(PathBuf),

    #[error("reports path '{0}' is not a directory or regular file")]
    NotADirectory(PathBuf),

    #[error("failed to scan '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One crash-dump file discovered by the scan. Read-only for the run.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Modification time, used as the crash timestamp on upload.
    pub modified: SystemTime,
}

impl Artifact {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            size_bytes: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Filename without extension; the `guid` fallback.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub workers: usize,
    pub dry_run: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            dry_run: false,
        }
    }
}

/// Aggregated per-run accounting, owned by the coordinator.
#[derive(Debug, Default, serde::Serialize)]
pub struct BatchResult {
    /// Artifacts found by the scan, in both normal and dry-run mode.
    pub candidates: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when cancellation stopped dispatch before the batch drained.
    pub interrupted: bool,
    /// One entry per dispatched artifact, in completion order.
    pub details: Vec<UploadOutcome>,
}

/// Observer invoked by the coordinator once per completed outcome. Keeps
/// progress reporting out of the upload logic.
pub type ProgressObserver = dyn Fn(&UploadOutcome) + Send + Sync;

/// Lists `.dmp` files in `path` (non-recursive), or treats a single file path
/// as a one-item batch. Entries are sorted so candidate listings are stable.
pub fn scan(path: &Path) -> Result<Vec<Artifact>, ScanError> {
    if !path.exists() {
        return Err(ScanError::NotFound(path.to_path_buf()));
    }
    if path.is_file() {
        let artifact = Artifact::from_path(path).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(vec![artifact]);
    }
    if !path.is_dir() {
        return Err(ScanError::NotADirectory(path.to_path_buf()));
    }

    let entries = std::fs::read_dir(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entry_path = entry.path();
        if !entry_path.is_file() {
            continue;
        }
        if entry_path.extension().and_then(|e| e.to_str()) != Some(DUMP_EXTENSION) {
            continue;
        }
        match Artifact::from_path(&entry_path) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                warn!(path = %entry_path.display(), error = %e, "skipping unreadable dump file");
            }
        }
    }
    artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(artifacts)
}

/// Clamps the requested worker count to `1..=MAX_WORKERS`, warning and
/// falling back to [`DEFAULT_WORKERS`] when it is out of range.
pub fn clamp_workers(requested: usize) -> usize {
    if (1..=MAX_WORKERS).contains(&requested) {
        requested
    } else {
        warn!(
            requested,
            default = DEFAULT_WORKERS,
            "worker count must be between 1 and 20, using default"
        );
        DEFAULT_WORKERS
    }
}

/// Runs one batch: scan, optional dry-run short-circuit, bounded fan-out,
/// blocking join, aggregation.
///
/// `cancel` is checked before each artifact is dispatched; once set, no new
/// work starts and in-flight uploads end at the timeout boundary. The partial
/// result is still returned with `interrupted` set.
pub async fn run<U: Uploader>(
    dsn: &Dsn,
    reports_path: &Path,
    config: &BatchConfig,
    uploader: &U,
    cancel: &AtomicBool,
    observer: Option<&ProgressObserver>,
) -> Result<BatchResult, ScanError> {
    let artifacts = scan(reports_path)?;
    let mut result = BatchResult {
        candidates: artifacts.len(),
        ..BatchResult::default()
    };

    if artifacts.is_empty() {
        warn!(path = %reports_path.display(), "no .dmp files found");
        return Ok(result);
    }
    info!(count = artifacts.len(), "found minidump files to upload");

    if config.dry_run {
        info!(count = artifacts.len(), "dry run: listing files without uploading");
        for artifact in &artifacts {
            info!(
                file = %artifact.file_name(),
                size = artifact.size_bytes,
                "would upload"
            );
        }
        return Ok(result);
    }

    let workers = clamp_workers(config.workers);
    info!(count = artifacts.len(), workers, "starting upload batch");

    let mut outcomes = stream::iter(artifacts)
        .take_while(|artifact| {
            let stop = cancel.load(Ordering::SeqCst);
            if stop {
                warn!(
                    file = %artifact.file_name(),
                    "cancellation requested, not dispatching remaining artifacts"
                );
            }
            futures::future::ready(!stop)
        })
        .map(|artifact| process_artifact(dsn, artifact, uploader))
        .buffer_unordered(workers);

    while let Some(outcome) = outcomes.next().await {
        if outcome.success {
            result.succeeded += 1;
            info!(file = %outcome.artifact.display(), "uploaded");
        } else {
            result.failed += 1;
            error!(
                file = %outcome.artifact.display(),
                status = ?outcome.http_status,
                detail = outcome.error_detail.as_deref().unwrap_or("unknown"),
                "upload failed"
            );
        }
        if let Some(observer) = observer {
            observer(&outcome);
        }
        result.details.push(outcome);
    }

    result.interrupted = cancel.load(Ordering::SeqCst);
    info!(
        succeeded = result.succeeded,
        failed = result.failed,
        "upload complete"
    );
    if result.failed > 0 {
        warn!(
            failed = result.failed,
            "some uploads failed, see per-file log lines above"
        );
    }
    Ok(result)
}

/// Full per-artifact pipeline: resolve sidecar metadata, read the dump, build
/// the request, submit. Strictly sequential within one artifact.
async fn process_artifact<U: Uploader>(dsn: &Dsn, artifact: Artifact, uploader: &U) -> UploadOutcome {
    let metadata = metadata::resolve(&artifact.path).await;
    let file_bytes = match tokio::fs::read(&artifact.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return UploadOutcome::failed_locally(
                artifact.path,
                format!("failed to read dump file: {e}"),
            );
        }
    };
    let request = endpoint::build(dsn, &artifact, &metadata, file_bytes);
    debug!(url = %request.url, file = %artifact.file_name(), "uploading");
    let response = uploader.upload(request).await;
    UploadOutcome::from_response(artifact.path, response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_accepts_valid_range() {
        assert_eq!(clamp_workers(1), 1);
        assert_eq!(clamp_workers(20), 20);
        assert_eq!(clamp_workers(7), 7);
    }

    #[test]
    fn clamp_resets_out_of_range_to_default() {
        assert_eq!(clamp_workers(0), DEFAULT_WORKERS);
        assert_eq!(clamp_workers(21), DEFAULT_WORKERS);
        assert_eq!(clamp_workers(usize::MAX), DEFAULT_WORKERS);
    }

    #[test]
    fn scan_missing_path_is_fatal() {
        let err = scan(Path::new("/definitely/not/here")).expect_err("must fail");
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[test]
    fn scan_filters_on_dump_extension_and_sorts() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("b.dmp"), b"MDMP").unwrap();
        std::fs::write(dir.path().join("a.dmp"), b"MDMP").unwrap();
        std::fs::write(dir.path().join("a.meta"), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("sub.dmp")).unwrap();

        let artifacts = scan(dir.path()).expect("scan ok");
        let names: Vec<String> = artifacts.iter().map(Artifact::file_name).collect();
        assert_eq!(names, vec!["a.dmp", "b.dmp"]);
        assert_eq!(artifacts[0].size_bytes, 4);
    }

    #[test]
    fn scan_single_file_is_one_item_batch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("only.dmp");
        std::fs::write(&file, b"MDMP").unwrap();

        let artifacts = scan(&file).expect("scan ok");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].stem(), "only");
    }

    #[test]
    fn scan_empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let artifacts = scan(dir.path()).expect("scan ok");
        assert!(artifacts.is_empty());
    }
}
