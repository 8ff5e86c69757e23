//! Batch crash-report uploader.
//!
//! Discovers crashpad minidump artifacts in a directory, pairs each with
//! optional sidecar metadata, derives the upload endpoint from a DSN-style
//! connection descriptor and uploads everything concurrently with bounded
//! parallelism and per-item accounting.

pub mod batch;
pub mod cli;
pub mod dsn;
pub mod endpoint;
pub mod metadata;
pub mod upload;
