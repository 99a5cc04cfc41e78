//! Provider abstraction for the receipt fallback chain.
//!
//! Two seams:
//! - [`TextExtractor`]: raw OCR, file in, text out (OCR.space, Azure Read)
//! - [`ReceiptProvider`]: file in, normalized [`ReceiptExtractionResult`] out
//!
//! OCR-only services become providers by pairing them with the LLM parser
//! (see `StagedProvider`); all-in-one services implement
//! [`ReceiptProvider`] directly.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::receipt::{ProviderKind, ReceiptExtractionResult};

/// Errors raised inside a provider. They never leave the provider: each is
/// turned into a failed [`ReceiptExtractionResult`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    Unavailable(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error ({status}): {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimited {
        provider: ProviderKind,
        retry_after_secs: Option<u64>,
    },

    #[error("No text detected")]
    NoText,

    #[error("{0}")]
    Failed(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Operation still pending after {attempts} polls ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },
}

/// Raw OCR stage: turns a file into unstructured text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Provider this extractor backs.
    fn kind(&self) -> ProviderKind;

    /// Recognize the text in an image or PDF.
    async fn extract_text(&self, path: &Path) -> Result<String, ProviderError>;
}

/// One strategy for extracting receipt data from a file.
///
/// `extract` reports every failure as a failed result and must not panic;
/// the fallback chain still guards against implementations that do.
#[async_trait]
pub trait ReceiptProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn extract(&self, path: &Path) -> ReceiptExtractionResult;
}
