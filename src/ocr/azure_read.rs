//! Azure Computer Vision Read (v3.2).
//!
//! The file is submitted as raw bytes; the service answers with an
//! `Operation-Location` that is polled until the read finishes.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::api_backend::{
    ensure_success, operation_location, poll_operation, read_upload, retry_on_rate_limit,
    OperationStatus, PollPolicy, AZURE_KEY_HEADER,
};
use super::backend::{ProviderError, TextExtractor};
use crate::config::AzureVisionConfig;
use crate::receipt::ProviderKind;

const SERVICE: &str = "Azure Vision";

/// Azure Read API client.
pub struct AzureReadBackend {
    client: Client,
    analyze_url: Url,
    key: String,
    poll: PollPolicy,
}

impl AzureReadBackend {
    /// Create a backend. Needs both an endpoint and a key.
    pub fn new(config: &AzureVisionConfig, poll: PollPolicy) -> Result<Self, ProviderError> {
        let (endpoint, key) = match (non_blank(&config.endpoint), non_blank(&config.key)) {
            (Some(endpoint), Some(key)) => (endpoint, key),
            _ => {
                return Err(ProviderError::Unavailable(
                    "AZURE_VISION_ENDPOINT and AZURE_VISION_KEY must be set".to_string(),
                ))
            }
        };

        let analyze_url = analyze_url(endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            analyze_url,
            key: key.to_string(),
            poll,
        })
    }

    async fn fetch_read_result(
        &self,
        location: &str,
    ) -> Result<(OperationStatus, ReadOperation), ProviderError> {
        let response = self
            .client
            .get(location)
            .header(AZURE_KEY_HEADER, &self.key)
            .send()
            .await?;
        let operation: ReadOperation = ensure_success(response, SERVICE).await?.json().await?;
        Ok((operation.status, operation))
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn analyze_url(endpoint: &str) -> Result<Url, ProviderError> {
    let url = format!("{}/vision/v3.2/read/analyze", endpoint.trim_end_matches('/'));
    Url::parse(&url).map_err(|e| {
        ProviderError::Unavailable(format!("invalid Azure Vision endpoint {}: {}", endpoint, e))
    })
}

#[async_trait]
impl TextExtractor for AzureReadBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureVision
    }

    async fn extract_text(&self, path: &Path) -> Result<String, ProviderError> {
        let upload = read_upload(path).await?;
        debug!(file = %upload.file_name, bytes = upload.bytes.len(), "submitting to Azure Read");

        let bytes = &upload.bytes;
        let response = retry_on_rate_limit(ProviderKind::AzureVision, || async move {
            Ok::<_, ProviderError>(
                self.client
                    .post(self.analyze_url.clone())
                    .header(AZURE_KEY_HEADER, &self.key)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(bytes.clone())
                    .send()
                    .await?,
            )
        })
        .await?;
        let response = ensure_success(response, SERVICE).await?;
        let location = operation_location(&response)?;

        let location = location.as_str();
        let (status, operation) =
            poll_operation(&self.poll, move || self.fetch_read_result(location)).await?;

        if status != OperationStatus::Succeeded {
            return Err(ProviderError::Failed(format!(
                "Azure OCR failed with status: {}",
                status.as_str()
            )));
        }

        let text = collect_lines(&operation);
        if text.trim().is_empty() {
            return Err(ProviderError::NoText);
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: OperationStatus,
    #[serde(default)]
    analyze_result: Option<ReadAnalyzeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadAnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadPage>,
}

#[derive(Debug, Deserialize)]
struct ReadPage {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Debug, Deserialize)]
struct ReadLine {
    text: String,
}

/// All recognized lines, page by page, one per line.
fn collect_lines(operation: &ReadOperation) -> String {
    operation
        .analyze_result
        .iter()
        .flat_map(|r| &r.read_results)
        .flat_map(|page| &page.lines)
        .map(|line| line.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
