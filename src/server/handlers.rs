//! HTTP request handlers for receipt scanning.

use std::path::Path;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, Instrument};
use uuid::Uuid;

use super::AppState;
use crate::ocr::sniff_extension;
use crate::receipt::ReceiptExtractionResult;

/// Client errors while accepting an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No image file provided")]
    MissingFile,

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Invalid request body: {0}")]
    InvalidJson(String),

    #[error("Invalid base64 image data")]
    InvalidBase64,

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    fn status(&self) -> StatusCode {
        match self {
            UploadError::Multipart(e) => e.status(),
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// JSON body for the base64 endpoint.
#[derive(Debug, Deserialize)]
pub struct Base64Upload {
    /// Raw base64 or a `data:<mime>;base64,` URL.
    pub image: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// API: service health and the active provider chain.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.pipeline.providers(),
    }))
}

/// API: scan a receipt uploaded as multipart form data.
pub async fn scan_receipt(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ReceiptExtractionResult>, UploadError> {
    let (file_name, bytes) = read_image_field(&mut multipart).await?;
    let upload = stage_upload(&state.upload_dir, file_name.as_deref(), &bytes).await?;
    Ok(Json(run_pipeline(&state, upload.path()).await))
}

/// API: scan a receipt sent as base64 in a JSON body.
pub async fn scan_receipt_base64(
    State(state): State<AppState>,
    payload: Result<Json<Base64Upload>, JsonRejection>,
) -> Result<Json<ReceiptExtractionResult>, UploadError> {
    let Json(body) = payload.map_err(|e| UploadError::InvalidJson(e.body_text()))?;
    let bytes = decode_image_data(&body.image)?;
    let upload = stage_upload(&state.upload_dir, body.filename.as_deref(), &bytes).await?;
    Ok(Json(run_pipeline(&state, upload.path()).await))
}

async fn read_image_field(
    multipart: &mut Multipart,
) -> Result<(Option<String>, Vec<u8>), UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if !matches!(field.name(), Some("image") | Some("file")) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(UploadError::EmptyFile);
        }
        return Ok((file_name, bytes.to_vec()));
    }
    Err(UploadError::MissingFile)
}

/// Decode raw base64 or a data URL.
pub fn decode_image_data(data: &str) -> Result<Vec<u8>, UploadError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.trim_start().starts_with("data:") => rest,
        _ => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(UploadError::MissingFile);
    }

    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|_| UploadError::InvalidBase64)?;
    if bytes.is_empty() {
        return Err(UploadError::EmptyFile);
    }
    Ok(bytes)
}

/// Write the upload to a temp file that is removed when dropped.
async fn stage_upload(
    dir: &Path,
    file_name: Option<&str>,
    bytes: &[u8],
) -> Result<NamedTempFile, UploadError> {
    let ext = file_name
        .and_then(client_extension)
        .or_else(|| sniff_extension(bytes).map(str::to_string))
        .unwrap_or_else(|| "bin".to_string());

    let file = tempfile::Builder::new()
        .prefix("receipt-")
        .suffix(&format!(".{}", ext))
        .tempfile_in(dir)?;
    tokio::fs::write(file.path(), bytes).await?;
    Ok(file)
}

/// Extension from a client-supplied filename, if it looks sane.
fn client_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| ext.to_ascii_lowercase())
}

async fn run_pipeline(state: &AppState, path: &Path) -> ReceiptExtractionResult {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("scan", %request_id);

    async {
        info!("Processing receipt upload");
        let result = state.pipeline.process(path).await;
        info!(
            success = result.is_success(),
            provider = ?result.provider(),
            "Receipt scan finished"
        );
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_url() {
        let bytes = decode_image_data("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_raw_base64_with_line_breaks() {
        let bytes = decode_image_data("aGVs\nbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image_data("not base64!!"),
            Err(UploadError::InvalidBase64)
        ));
        assert!(matches!(
            decode_image_data("data:image/jpeg;base64,"),
            Err(UploadError::MissingFile)
        ));
    }

    #[test]
    fn test_client_extension() {
        assert_eq!(client_extension("IMG_2041.JPG").as_deref(), Some("jpg"));
        assert_eq!(client_extension("scan.pdf").as_deref(), Some("pdf"));
        assert_eq!(client_extension("noext"), None);
        assert_eq!(client_extension("x.../../etc"), None);
    }

    #[tokio::test]
    async fn test_stage_upload_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = stage_upload(dir.path(), Some("receipt.png"), b"bytes")
            .await
            .unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "png");

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(UploadError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            UploadError::Io(std::io::Error::other("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
