//! OCR.space text recognition.
//!
//! Uploads the file as multipart form data and returns the text of the
//! first parsed result. Requires `OCR_API_KEY`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::api_backend::{ensure_success, read_upload, retry_on_rate_limit, Upload};
use super::backend::{ProviderError, TextExtractor};
use crate::config::OcrSpaceConfig;
use crate::receipt::ProviderKind;

/// OCR.space API client.
pub struct OcrSpaceBackend {
    client: Client,
    config: OcrSpaceConfig,
    api_key: String,
}

impl OcrSpaceBackend {
    /// Create a backend. Fails when no API key is configured.
    pub fn new(config: OcrSpaceConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::Unavailable(
                    "OCR_API_KEY not set. Get a free key from https://ocr.space/ocrapi".to_string(),
                )
            })?;

        Url::parse(&config.endpoint).map_err(|e| {
            let message = format!("invalid OCR.space endpoint {}: {}", config.endpoint, e);
            ProviderError::Unavailable(message)
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn form(&self, upload: &Upload) -> Result<Form, ProviderError> {
        let file = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime)?;

        Ok(Form::new()
            .text("apikey", self.api_key.clone())
            .text("language", self.config.language.clone())
            .text("isOverlayRequired", "false")
            .text("detectOrientation", "true")
            .text("isTable", self.config.detect_tables.to_string())
            .text("scale", "true")
            .text("OCREngine", self.config.engine.to_string())
            .part("file", file))
    }
}

#[async_trait]
impl TextExtractor for OcrSpaceBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OcrSpace
    }

    async fn extract_text(&self, path: &Path) -> Result<String, ProviderError> {
        let upload = read_upload(path).await?;
        debug!(
            file = %upload.file_name,
            mime = %upload.mime,
            bytes = upload.bytes.len(),
            "sending file to OCR.space"
        );

        let upload = &upload;
        let response = retry_on_rate_limit(ProviderKind::OcrSpace, || async move {
            let form = self.form(upload)?;
            Ok::<_, ProviderError>(
                self.client
                    .post(&self.config.endpoint)
                    .multipart(form)
                    .send()
                    .await?,
            )
        })
        .await?;

        let body: OcrSpaceResponse = ensure_success(response, "OCR.space").await?.json().await?;
        text_from_response(body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceResponse {
    #[serde(default)]
    parsed_results: Option<Vec<OcrSpaceParsedResult>>,
    #[serde(default)]
    error_message: Option<ErrorMessage>,
    #[serde(default)]
    is_errored_on_processing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceParsedResult {
    #[serde(default)]
    parsed_text: Option<String>,
    #[serde(default)]
    error_message: Option<ErrorMessage>,
}

/// OCR.space reports errors as either a string or a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn text(&self) -> Option<String> {
        let text = match self {
            ErrorMessage::One(s) => s.trim().to_string(),
            ErrorMessage::Many(list) => list
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        };
        (!text.is_empty()).then_some(text)
    }
}

fn text_from_response(resp: OcrSpaceResponse) -> Result<String, ProviderError> {
    let top_error = resp.error_message.as_ref().and_then(ErrorMessage::text);

    let Some(first) = resp.parsed_results.and_then(|r| r.into_iter().next()) else {
        return Err(match top_error {
            Some(message) => ProviderError::Failed(message),
            None => ProviderError::NoText,
        });
    };

    if let Some(message) = first.error_message.as_ref().and_then(ErrorMessage::text) {
        return Err(ProviderError::Failed(message));
    }
    if resp.is_errored_on_processing {
        if let Some(message) = top_error {
            return Err(ProviderError::Failed(message));
        }
    }

    let text = first.parsed_text.unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::NoText);
    }
    Ok(text.to_string())
}
