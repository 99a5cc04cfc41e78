//! Two-stage provider: OCR text extraction followed by LLM parsing.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::backend::{ReceiptProvider, TextExtractor};
use crate::receipt::{ProviderKind, ReceiptExtractionResult, ReceiptParser};

/// Pairs a [`TextExtractor`] with the shared [`ReceiptParser`].
pub struct StagedProvider {
    extractor: Box<dyn TextExtractor>,
    parser: Arc<ReceiptParser>,
}

impl StagedProvider {
    pub fn new(extractor: Box<dyn TextExtractor>, parser: Arc<ReceiptParser>) -> Self {
        Self { extractor, parser }
    }
}

#[async_trait]
impl ReceiptProvider for StagedProvider {
    fn kind(&self) -> ProviderKind {
        self.extractor.kind()
    }

    async fn extract(&self, path: &Path) -> ReceiptExtractionResult {
        let kind = self.kind();

        let text = match self.extractor.extract_text(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!("{} text extraction failed: {}", kind, e);
                return ReceiptExtractionResult::failure(kind, e.to_string());
            }
        };
        debug!(provider = %kind, chars = text.chars().count(), "OCR text extracted");

        match self.parser.parse(&text).await {
            Ok(parsed) => ReceiptExtractionResult::success(kind, Some(text), parsed, None),
            Err(e) => {
                warn!("{} receipt parsing failed: {}", kind, e);
                let result =
                    ReceiptExtractionResult::failure(kind, e.to_string()).with_ocr_text(text);
                match e.raw_output() {
                    Some(raw) => result.with_raw_output(raw),
                    None => result,
                }
            }
        }
    }
}
