//! Receipt extraction results and the structured receipt record.
//!
//! Every provider in the fallback chain reports through
//! [`ReceiptExtractionResult`], so callers see one shape regardless of
//! which OCR service did the work.

pub mod normalize;
pub mod parser;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use parser::{decode_receipt, DecodeError, ParseError, ReceiptParser};

/// Error reported when every configured provider has failed.
pub const ALL_PROVIDERS_FAILED: &str = "All receipt processing methods failed";

/// Receipt extraction providers, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OCR.space text recognition followed by the LLM parser.
    OcrSpace,
    /// Azure Computer Vision Read followed by the LLM parser.
    AzureVision,
    /// Azure Form Recognizer prebuilt receipt model.
    AzureForm,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OcrSpace,
        ProviderKind::AzureVision,
        ProviderKind::AzureForm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OcrSpace => "ocr_space",
            ProviderKind::AzureVision => "azure_vision",
            ProviderKind::AzureForm => "azure_form",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ocr_space" | "ocrspace" => Some(ProviderKind::OcrSpace),
            "azure_vision" => Some(ProviderKind::AzureVision),
            "azure_form" | "azure_form_recognizer" => Some(ProviderKind::AzureForm),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

impl ReceiptItem {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            price,
            quantity: None,
            unit_price: None,
        }
    }
}

/// Structured receipt data. Every field may be missing; partial
/// extraction is normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReceipt {
    pub merchant: Option<String>,
    pub total_amount: Option<f64>,
    /// Transaction date as `YYYY-MM-DD`.
    pub date: Option<String>,
    pub tax_amount: Option<f64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,

    // Only the document model fills these in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip_amount: Option<f64>,
    /// Per-field confidence scores reported by the provider.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_confidence: BTreeMap<String, f64>,
}

/// Outcome of running one file through a provider (or the whole chain).
///
/// A failed result always carries an error and never carries parsed data;
/// a successful one always carries parsed data. The constructors are the
/// only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptExtractionResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<ProviderKind>,
    ocr_text: Option<String>,
    parsed_data: Option<ParsedReceipt>,
    confidence: Option<f64>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_output: Option<String>,
}

impl ReceiptExtractionResult {
    /// A successful extraction.
    pub fn success(
        provider: ProviderKind,
        ocr_text: Option<String>,
        parsed: ParsedReceipt,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            success: true,
            provider: Some(provider),
            ocr_text,
            parsed_data: Some(parsed),
            confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            error: None,
            raw_output: None,
        }
    }

    /// A provider-level failure.
    pub fn failure(provider: ProviderKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider: Some(provider),
            ocr_text: None,
            parsed_data: None,
            confidence: None,
            error: Some(error.into()),
            raw_output: None,
        }
    }

    /// The terminal result when no provider succeeded.
    pub fn exhausted() -> Self {
        Self {
            success: false,
            provider: None,
            ocr_text: None,
            parsed_data: None,
            confidence: None,
            error: Some(ALL_PROVIDERS_FAILED.to_string()),
            raw_output: None,
        }
    }

    /// Attach the OCR text that was recognized before a later stage failed.
    pub fn with_ocr_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into());
        self
    }

    /// Attach unparseable model output for offline diagnosis.
    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        if !self.success {
            self.raw_output = Some(raw.into());
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.provider
    }

    pub fn ocr_text(&self) -> Option<&str> {
        self.ocr_text.as_deref()
    }

    pub fn parsed_data(&self) -> Option<&ParsedReceipt> {
        self.parsed_data.as_ref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn raw_output(&self) -> Option<&str> {
        self.raw_output.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_names() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(
            ProviderKind::from_name("Azure-Form"),
            Some(ProviderKind::AzureForm)
        );
        assert_eq!(ProviderKind::from_name("tesseract"), None);
    }

    #[test]
    fn test_failure_never_carries_parsed_data() {
        let result = ReceiptExtractionResult::failure(ProviderKind::OcrSpace, "boom")
            .with_ocr_text("TOTAL 1.00")
            .with_raw_output("not json");

        assert!(!result.is_success());
        assert!(result.parsed_data().is_none());
        assert_eq!(result.error(), Some("boom"));
        assert_eq!(result.ocr_text(), Some("TOTAL 1.00"));
        assert_eq!(result.raw_output(), Some("not json"));
    }

    #[test]
    fn test_success_ignores_raw_output() {
        let result = ReceiptExtractionResult::success(
            ProviderKind::AzureForm,
            None,
            ParsedReceipt::default(),
            Some(1.4),
        )
        .with_raw_output("ignored");

        assert!(result.is_success());
        assert!(result.error().is_none());
        assert!(result.raw_output().is_none());
        assert_eq!(result.confidence(), Some(1.0));
    }

    #[test]
    fn test_exhausted_json_shape() {
        let json = serde_json::to_value(ReceiptExtractionResult::exhausted()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], ALL_PROVIDERS_FAILED);
        assert!(json.get("provider").is_none());
        assert!(json["parsed_data"].is_null());
    }

    #[test]
    fn test_parsed_receipt_omits_document_extras() {
        let parsed = ParsedReceipt {
            merchant: Some("Shop".to_string()),
            items: vec![ReceiptItem::new("Milk", 1.5)],
            ..Default::default()
        };
        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["merchant"], "Shop");
        assert!(json["total_amount"].is_null());
        assert!(json.get("merchant_address").is_none());
        assert!(json.get("field_confidence").is_none());
        assert!(json["items"][0].get("quantity").is_none());
    }
}
