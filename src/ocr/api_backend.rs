//! Shared infrastructure for cloud API providers (OCR.space, Azure).
//!
//! Provides common helpers for reading uploads, rate-limit retries and
//! polling asynchronous Azure operations.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::backend::ProviderError;
use crate::rate_limit::{backoff_delay, parse_retry_after, MAX_RETRIES};
use crate::receipt::ProviderKind;

/// Azure subscription key header.
pub const AZURE_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// An uploaded file, read into memory.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: String,
}

/// Read an upload from disk, rejecting empty files.
pub async fn read_upload(path: &Path) -> Result<Upload, ProviderError> {
    let bytes = tokio::fs::read(path).await?;
    if bytes.is_empty() {
        return Err(ProviderError::EmptyFile);
    }

    let mime = detect_mime(&bytes, path);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("receipt")
        .to_string();

    Ok(Upload {
        bytes,
        mime,
        file_name,
    })
}

/// MIME type from file content, falling back to the extension.
pub fn detect_mime(bytes: &[u8], path: &Path) -> String {
    infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| mime_guess::from_path(path).first_or_octet_stream().to_string())
}

/// File extension implied by file content, if recognizable.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.extension())
}

/// Retry an API request on 429 (rate limited) responses with exponential backoff.
///
/// Returns the first non-429 response. If all retries are exhausted,
/// returns `ProviderError::RateLimited`.
pub async fn retry_on_rate_limit<F, Fut>(
    provider: ProviderKind,
    make_request: F,
) -> Result<Response, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        let response = make_request().await?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        let retry_after_secs = retry_after.and_then(|s| s.trim().parse::<u64>().ok());

        if attempt >= MAX_RETRIES {
            return Err(ProviderError::RateLimited {
                provider,
                retry_after_secs,
            });
        }

        let wait = parse_retry_after(retry_after).unwrap_or_else(|| backoff_delay(attempt, 1000));

        warn!(
            "{} rate limited (attempt {}), waiting {:?}",
            provider,
            attempt + 1,
            wait
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// Turn a non-2xx response into `ProviderError::Api`.
pub async fn ensure_success(
    response: Response,
    service: &'static str,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        service,
        status: status.as_u16(),
        body,
    })
}

/// URL of the asynchronous operation started by an Azure analyze call.
pub fn operation_location(response: &Response) -> Result<String, ProviderError> {
    response
        .headers()
        .get("operation-location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Malformed("missing Operation-Location header".to_string()))
}

/// Status of an asynchronous Azure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, OperationStatus::NotStarted | OperationStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::NotStarted => "notStarted",
            OperationStatus::Running => "running",
            OperationStatus::Succeeded => "succeeded",
            OperationStatus::Failed => "failed",
            OperationStatus::Canceled => "canceled",
            OperationStatus::Unknown => "unknown",
        }
    }
}

/// Bounds on polling an asynchronous operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
            deadline: Duration::from_secs(120),
        }
    }
}

/// Poll until the operation leaves `notStarted`/`running`.
///
/// Gives up with `ProviderError::Timeout` once `max_attempts` polls have
/// been made or the next poll would land past `deadline`.
pub async fn poll_operation<T, F, Fut>(
    policy: &PollPolicy,
    mut fetch: F,
) -> Result<(OperationStatus, T), ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(OperationStatus, T), ProviderError>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        let (status, body) = fetch().await?;
        attempts += 1;

        if !status.is_pending() {
            return Ok((status, body));
        }

        let elapsed = start.elapsed();
        if attempts >= policy.max_attempts || elapsed + policy.interval > policy.deadline {
            return Err(ProviderError::Timeout { attempts, elapsed });
        }

        debug!(attempts, status = status.as_str(), "operation still pending");
        tokio::time::sleep(policy.interval).await;
    }
}
