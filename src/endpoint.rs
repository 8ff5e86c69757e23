//! Builds the minidump submission from its parts.
//!
//! Pure assembly: DSN + artifact + resolved metadata in, URL and ordered form
//! payload out. The crash timestamp is the artifact's modification time so
//! the ingest side sees the original crash time, not the upload time.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::batch::Artifact;
use crate::dsn::Dsn;
use crate::metadata::Metadata;

/// Multipart field name the ingest endpoint expects for the dump itself.
pub const MINIDUMP_FILE_FIELD: &str = "upload_file_minidump";

/// One fully assembled multipart submission.
#[derive(Debug, Clone)]
pub struct MinidumpRequest {
    pub url: String,
    /// String form fields, in insertion order: metadata fields first, then
    /// `sentry_timestamp`, then `guid`.
    pub form_fields: IndexMap<String, String>,
    /// Basename sent as the file part's filename.
    pub file_name: String,
    pub file_bytes: Vec<u8>,
}

/// Assembles the upload URL and form payload for one artifact.
///
/// Every metadata field is copied in as a string. `guid` prefers the GUID
/// extracted from the sidecar and falls back to the filename stem, so every
/// upload carries a stable crash identifier.
pub fn build(dsn: &Dsn, artifact: &Artifact, metadata: &Metadata, file_bytes: Vec<u8>) -> MinidumpRequest {
    let url = format!(
        "{}://{}/api/{}/minidump/?sentry_key={}",
        dsn.scheme,
        dsn.authority(),
        dsn.project_id,
        dsn.public_key
    );

    let crash_time: DateTime<Utc> = artifact.modified.into();

    let mut form_fields = metadata.fields.clone();
    form_fields.insert("sentry_timestamp".to_string(), crash_time.to_rfc3339());
    let guid = metadata
        .crash_guid
        .clone()
        .unwrap_or_else(|| artifact.stem());
    form_fields.insert("guid".to_string(), guid);

    MinidumpRequest {
        url,
        form_fields,
        file_name: artifact.file_name(),
        file_bytes,
    }
}
