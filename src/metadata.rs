//! Sidecar metadata resolution.
//!
//! Crashpad writes an optional sidecar next to each minidump: same base name,
//! `.meta` extension. The sidecar is either a JSON object or an opaque binary
//! blob; for the latter we fall back to heuristics (GUID pattern scan,
//! fixed-offset timestamp probing) to recover whatever crash context we can.
//! Resolution never fails: a missing or unreadable sidecar degrades to empty
//! metadata and the artifact is still uploaded.

use std::path::Path;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Extension of the sidecar file placed next to each `.dmp`.
pub const SIDECAR_EXTENSION: &str = "meta";

/// Byte offsets probed for embedded little-endian timestamps. Heuristic,
/// inherited from observed crashpad binary sidecar layouts; callers probing
/// other layouts can pass their own offsets to [`extract_timestamps`].
pub const TIMESTAMP_OFFSETS: [usize; 2] = [8, 16];

/// 2000-01-01T00:00:00Z, lower bound for a plausible crash timestamp.
pub const EPOCH_LOWER_BOUND: u64 = 946_684_800;
/// 2100-01-01T00:00:00Z, upper bound for a plausible crash timestamp.
pub const EPOCH_UPPER_BOUND: u64 = 4_102_444_800;

/// Canonical dashed 8-4-4-4-12 hex GUID.
static GUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("GUID pattern compiles")
});

/// How the sidecar bytes were interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Json,
    Binary,
}

/// Crash context recovered from the sidecar, scoped to one artifact.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// None when no sidecar existed or it was unreadable.
    pub kind: Option<MetadataKind>,
    /// Top-level key/value pairs, stringified, in source order.
    pub fields: IndexMap<String, String>,
    /// Crash GUID lifted from the fields or scanned out of binary data.
    pub crash_guid: Option<String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
    }
}

/// Locates and parses the sidecar for `artifact_path`.
///
/// Missing sidecar is the common case and not an error. Read failures are
/// logged and degrade to empty metadata; they never abort the upload.
pub async fn resolve(artifact_path: &Path) -> Metadata {
    let sidecar = artifact_path.with_extension(SIDECAR_EXTENSION);
    let bytes = match tokio::fs::read(&sidecar).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(artifact = %artifact_path.display(), "no sidecar metadata file");
            return Metadata::default();
        }
        Err(e) => {
            warn!(
                sidecar = %sidecar.display(),
                error = %e,
                "failed to read sidecar metadata, continuing without it"
            );
            return Metadata::default();
        }
    };
    debug!(
        sidecar = %sidecar.display(),
        size = bytes.len(),
        "loaded sidecar metadata"
    );
    from_bytes(&bytes)
}

/// Interprets raw sidecar bytes: JSON object first, binary heuristics second.
pub fn from_bytes(bytes: &[u8]) -> Metadata {
    match parse_json_object(bytes) {
        Some(metadata) => metadata,
        None => binary_fallback(bytes),
    }
}

fn parse_json_object(bytes: &[u8]) -> Option<Metadata> {
    let text = std::str::from_utf8(bytes).ok()?;
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;

    let mut fields = IndexMap::new();
    for (key, value) in object {
        fields.insert(key.clone(), stringify(value));
    }
    let crash_guid = fields.get("crash_guid").cloned();

    Some(Metadata {
        kind: Some(MetadataKind::Json),
        fields,
        crash_guid,
    })
}

/// JSON strings keep their content; everything else keeps its JSON notation.
fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn binary_fallback(bytes: &[u8]) -> Metadata {
    let mut fields = IndexMap::new();
    fields.insert("metadata_type".to_string(), "binary".to_string());
    fields.insert("metadata_size".to_string(), bytes.len().to_string());

    let crash_guid = find_guid(bytes);
    if let Some(guid) = &crash_guid {
        debug!(guid = %guid, "extracted crash GUID from binary sidecar");
        fields.insert("crash_guid".to_string(), guid.clone());
    }

    for (offset, timestamp) in extract_timestamps(bytes, &TIMESTAMP_OFFSETS) {
        fields.insert(format!("extracted_timestamp_{offset}"), timestamp.to_string());
    }

    Metadata {
        kind: Some(MetadataKind::Binary),
        fields,
        crash_guid,
    }
}

/// First canonical dashed-hex GUID found in the ASCII projection of `bytes`.
/// Non-ASCII bytes are dropped before scanning, matching how crashpad blobs
/// interleave text with binary structures.
pub fn find_guid(bytes: &[u8]) -> Option<String> {
    let ascii: String = bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();
    GUID_PATTERN.find(&ascii).map(|m| m.as_str().to_string())
}

/// Probes `bytes` at each offset for a little-endian u64 that looks like a
/// Unix timestamp in seconds (years 2000-2100). Offsets past the end of the
/// buffer are skipped; nothing here can fail.
pub fn extract_timestamps(bytes: &[u8], offsets: &[usize]) -> Vec<(usize, u64)> {
    let mut found = Vec::new();
    for &offset in offsets {
        let Some(end) = offset.checked_add(8) else {
            continue;
        };
        let Some(chunk) = bytes.get(offset..end) else {
            continue;
        };
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let value = u64::from_le_bytes(raw);
        if value > EPOCH_LOWER_BOUND && value < EPOCH_UPPER_BOUND {
            found.push((offset, value));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_fields_are_stringified_in_order() {
        let sidecar = br#"{"product": "demo", "version": "1.2.3", "pid": 4711, "nested": {"a": 1}}"#;
        let metadata = from_bytes(sidecar);
        assert_eq!(metadata.kind, Some(MetadataKind::Json));
        let fields: Vec<(&str, &str)> = metadata
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("product", "demo"),
                ("version", "1.2.3"),
                ("pid", "4711"),
                ("nested", r#"{"a":1}"#),
            ]
        );
        assert_eq!(metadata.crash_guid, None);
    }

    #[test]
    fn json_crash_guid_field_is_lifted() {
        let sidecar = br#"{"crash_guid": "3F2504E0-4F89-11D3-9A0C-0305E82C3301"}"#;
        let metadata = from_bytes(sidecar);
        assert_eq!(
            metadata.crash_guid.as_deref(),
            Some("3F2504E0-4F89-11D3-9A0C-0305E82C3301")
        );
    }

    #[test]
    fn json_non_object_falls_back_to_binary() {
        let metadata = from_bytes(b"[1, 2, 3]");
        assert_eq!(metadata.kind, Some(MetadataKind::Binary));
        assert_eq!(metadata.fields.get("metadata_type").unwrap(), "binary");
        assert_eq!(metadata.fields.get("metadata_size").unwrap(), "9");
    }

    #[test]
    fn binary_guid_is_found_between_non_ascii_bytes() {
        let mut blob = vec![0xff, 0xfe, 0x00, 0x80];
        blob.extend_from_slice(b"garbage 3F2504E0-4F89-11D3-9A0C-0305E82C3301 tail");
        blob.push(0xff);
        let metadata = from_bytes(&blob);
        assert_eq!(metadata.kind, Some(MetadataKind::Binary));
        assert_eq!(
            metadata.crash_guid.as_deref(),
            Some("3F2504E0-4F89-11D3-9A0C-0305E82C3301")
        );
        assert_eq!(
            metadata.fields.get("crash_guid").map(String::as_str),
            Some("3F2504E0-4F89-11D3-9A0C-0305E82C3301")
        );
    }

    #[test]
    fn find_guid_returns_first_match() {
        let blob = b"aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee then 11111111-2222-3333-4444-555555555555";
        assert_eq!(
            find_guid(blob).as_deref(),
            Some("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee")
        );
    }

    #[test]
    fn timestamp_extraction_respects_plausible_range() {
        // 32 bytes: a plausible timestamp at offset 8, garbage at offset 16.
        let mut blob = vec![0u8; 32];
        let plausible: u64 = 1_700_000_000; // late 2023
        blob[8..16].copy_from_slice(&plausible.to_le_bytes());
        blob[16..24].copy_from_slice(&u64::MAX.to_le_bytes());

        let found = extract_timestamps(&blob, &TIMESTAMP_OFFSETS);
        assert_eq!(found, vec![(8, plausible)]);

        let metadata = from_bytes(&blob);
        assert_eq!(
            metadata.fields.get("extracted_timestamp_8").map(String::as_str),
            Some("1700000000")
        );
        assert!(!metadata.fields.contains_key("extracted_timestamp_16"));
    }

    #[test]
    fn timestamp_extraction_skips_short_buffers() {
        assert!(extract_timestamps(&[0u8; 10], &TIMESTAMP_OFFSETS).is_empty());
        assert!(extract_timestamps(&[], &TIMESTAMP_OFFSETS).is_empty());
    }

    #[test]
    fn timestamp_extraction_tolerates_huge_offsets() {
        let blob = [0u8; 32];
        assert!(extract_timestamps(&blob, &[usize::MAX, usize::MAX - 7]).is_empty());
    }

    #[tokio::test]
    async fn missing_sidecar_resolves_to_empty_metadata() {
        let dir = tempfile::tempdir().expect("temp dir");
        let dump = dir.path().join("crash1.dmp");
        std::fs::write(&dump, b"MDMP").expect("write dump");

        let metadata = resolve(&dump).await;
        assert!(metadata.is_empty());
        assert!(metadata.fields.is_empty());
        assert_eq!(metadata.crash_guid, None);
    }

    #[tokio::test]
    async fn unreadable_sidecar_degrades_to_empty_metadata() {
        let dir = tempfile::tempdir().expect("temp dir");
        let dump = dir.path().join("crash1.dmp");
        std::fs::write(&dump, b"MDMP").expect("write dump");
        // A directory at the sidecar path exists but cannot be read as a file.
        std::fs::create_dir(dir.path().join("crash1.meta")).expect("create sidecar dir");

        let metadata = resolve(&dump).await;
        assert!(metadata.is_empty());
        assert!(metadata.fields.is_empty());
        assert_eq!(metadata.crash_guid, None);
    }

    #[tokio::test]
    async fn sidecar_next_to_artifact_is_resolved() {
        let dir = tempfile::tempdir().expect("temp dir");
        let dump = dir.path().join("crash1.dmp");
        std::fs::write(&dump, b"MDMP").expect("write dump");
        std::fs::write(dir.path().join("crash1.meta"), br#"{"product": "demo"}"#)
            .expect("write sidecar");

        let metadata = resolve(&dump).await;
        assert_eq!(metadata.kind, Some(MetadataKind::Json));
        assert_eq!(metadata.fields.get("product").map(String::as_str), Some("demo"));
    }
}
