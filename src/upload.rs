//! Single-submission upload client.
//!
//! The [`Uploader`] trait is the seam between the batch coordinator and the
//! network. It is async, `Send + Sync`, and annotated for `mockall` so the
//! coordinator can be exercised in tests without a network. Transport and
//! classification live in [`HttpUploader`]: one multipart POST per artifact,
//! a fixed 30 second timeout, no retry.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::endpoint::{MinidumpRequest, MINIDUMP_FILE_FIELD};

/// Per-attempt upload bound. Exceeding it is a failure, not a hang.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Classified result of one submission attempt.
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error_detail: Option<String>,
}

impl UploadResponse {
    pub fn ok(status: u16) -> Self {
        Self {
            success: true,
            http_status: Some(status),
            error_detail: None,
        }
    }

    pub fn failed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            http_status: status,
            error_detail: Some(detail.into()),
        }
    }
}

/// Per-artifact outcome, produced exactly once per artifact.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadOutcome {
    pub artifact: PathBuf,
    pub success: bool,
    pub http_status: Option<u16>,
    pub error_detail: Option<String>,
}

impl UploadOutcome {
    pub fn from_response(artifact: PathBuf, response: UploadResponse) -> Self {
        Self {
            artifact,
            success: response.success,
            http_status: response.http_status,
            error_detail: response.error_detail,
        }
    }

    /// Pipeline failure before any network activity (e.g. unreadable dump).
    pub fn failed_locally(artifact: PathBuf, detail: impl Into<String>) -> Self {
        Self {
            artifact,
            success: false,
            http_status: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// Trait for submitting one minidump request.
///
/// Implementations classify rather than propagate: a network failure comes
/// back as an unsuccessful [`UploadResponse`], never as an `Err` that could
/// abort the batch.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Transmit the full artifact content exactly once.
    async fn upload(&self, request: MinidumpRequest) -> UploadResponse;
}

/// Production uploader over `reqwest`.
pub struct HttpUploader {
    client: reqwest::Client,
}

impl HttpUploader {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, request: MinidumpRequest) -> UploadResponse {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &request.form_fields {
            form = form.text(name.clone(), value.clone());
        }
        let part = match reqwest::multipart::Part::bytes(request.file_bytes)
            .file_name(request.file_name)
            .mime_str("application/octet-stream")
        {
            Ok(part) => part,
            Err(e) => return UploadResponse::failed(None, format!("building file part: {e}")),
        };
        form = form.part(MINIDUMP_FILE_FIELD, part);

        match self.client.post(&request.url).multipart(form).send().await {
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    UploadResponse::ok(status.as_u16())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    UploadResponse::failed(
                        Some(status.as_u16()),
                        format!("upload failed with status {status}: {body}"),
                    )
                }
            }
            Err(e) => UploadResponse::failed(e.status().map(|s| s.as_u16()), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_carries_response_classification() {
        let outcome = UploadOutcome::from_response(
            PathBuf::from("/reports/crash1.dmp"),
            UploadResponse::failed(Some(500), "upload failed with status 500: boom"),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.http_status, Some(500));
        assert!(outcome.error_detail.as_deref().unwrap_or("").contains("500"));
    }

    #[test]
    fn local_failure_has_no_status() {
        let outcome =
            UploadOutcome::failed_locally(PathBuf::from("/reports/crash1.dmp"), "read error");
        assert!(!outcome.success);
        assert_eq!(outcome.http_status, None);
    }
}
