//! Azure Form Recognizer prebuilt receipt model.
//!
//! Unlike the OCR-only providers this one returns structured fields
//! directly, each with its own confidence score, so no LLM pass is needed.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::api_backend::{
    ensure_success, operation_location, poll_operation, read_upload, retry_on_rate_limit,
    OperationStatus, PollPolicy, AZURE_KEY_HEADER,
};
use super::azure_read::non_blank;
use super::backend::{ProviderError, ReceiptProvider};
use crate::config::AzureFormConfig;
use crate::receipt::normalize::{normalize_currency, normalize_date, parse_amount};
use crate::receipt::{ParsedReceipt, ProviderKind, ReceiptExtractionResult, ReceiptItem};

const SERVICE: &str = "Azure Form Recognizer";

/// Azure document-model client for receipts.
pub struct AzureReceiptBackend {
    client: Client,
    analyze_url: Url,
    key: String,
    poll: PollPolicy,
}

impl AzureReceiptBackend {
    /// Create a backend. Needs both an endpoint and a key.
    pub fn new(config: &AzureFormConfig, poll: PollPolicy) -> Result<Self, ProviderError> {
        let (endpoint, key) = match (non_blank(&config.endpoint), non_blank(&config.key)) {
            (Some(endpoint), Some(key)) => (endpoint, key),
            _ => {
                return Err(ProviderError::Unavailable(
                    "AZURE_FORM_RECOGNIZER_ENDPOINT and AZURE_FORM_RECOGNIZER_KEY must be set"
                        .to_string(),
                ))
            }
        };

        let url = format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            endpoint.trim_end_matches('/'),
            config.model_id,
            config.api_version
        );
        let analyze_url = Url::parse(&url).map_err(|e| {
            let message = format!("invalid Form Recognizer endpoint {}: {}", endpoint, e);
            ProviderError::Unavailable(message)
        })?;

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

    async fn analyze(&self, path: &Path) -> Result<AnalyzeResult, ProviderError> {
        let upload = read_upload(path).await?;
        debug!(file = %upload.file_name, mime = %upload.mime, "submitting to Form Recognizer");

        let upload = &upload;
        let response = retry_on_rate_limit(ProviderKind::AzureForm, || async move {
            Ok::<_, ProviderError>(
                self.client
                    .post(self.analyze_url.clone())
                    .header(AZURE_KEY_HEADER, &self.key)
                    .header(CONTENT_TYPE, upload.mime.as_str())
                    .body(upload.bytes.clone())
                    .send()
                    .await?,
            )
        })
        .await?;
        let response = ensure_success(response, SERVICE).await?;
        let location = operation_location(&response)?;

        let location = location.as_str();
        let (status, operation) =
            poll_operation(&self.poll, move || self.fetch_analysis(location)).await?;

        if status != OperationStatus::Succeeded {
            let detail = operation
                .error
                .map(|e| format!(" ({}: {})", e.code, e.message))
                .unwrap_or_default();
            return Err(ProviderError::Failed(format!(
                "Azure receipt analysis failed with status: {}{}",
                status.as_str(),
                detail
            )));
        }

        operation
            .analyze_result
            .ok_or_else(|| ProviderError::Malformed("succeeded without analyzeResult".to_string()))
    }

    async fn fetch_analysis(
        &self,
        location: &str,
    ) -> Result<(OperationStatus, AnalyzeOperation), ProviderError> {
        let response = self
            .client
            .get(location)
            .header(AZURE_KEY_HEADER, &self.key)
            .send()
            .await?;
        let operation: AnalyzeOperation = ensure_success(response, SERVICE).await?.json().await?;
        Ok((operation.status, operation))
    }
}

#[async_trait]
impl ReceiptProvider for AzureReceiptBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureForm
    }

    async fn extract(&self, path: &Path) -> ReceiptExtractionResult {
        let result = match self.analyze(path).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Form Recognizer failed: {}", e);
                return ReceiptExtractionResult::failure(ProviderKind::AzureForm, e.to_string());
            }
        };

        match receipt_from_analysis(&result) {
            Ok((receipt, confidence)) => {
                info!(
                    confidence,
                    items = receipt.items.len(),
                    "Form Recognizer extracted receipt"
                );
                ReceiptExtractionResult::success(
                    ProviderKind::AzureForm,
                    result.content.filter(|c| !c.trim().is_empty()),
                    receipt,
                    Some(confidence),
                )
            }
            Err(e) => ReceiptExtractionResult::failure(ProviderKind::AzureForm, e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: OperationStatus,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    documents: Vec<AnalyzedDocument>,
}

#[derive(Debug, Deserialize)]
struct AnalyzedDocument {
    #[serde(default)]
    fields: HashMap<String, DocumentField>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentField {
    value_string: Option<String>,
    value_number: Option<f64>,
    value_integer: Option<i64>,
    value_date: Option<String>,
    value_time: Option<String>,
    value_phone_number: Option<String>,
    value_currency: Option<CurrencyValue>,
    #[serde(default)]
    value_array: Vec<DocumentField>,
    #[serde(default)]
    value_object: HashMap<String, DocumentField>,
    content: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyValue {
    amount: Option<f64>,
    currency_code: Option<String>,
}

impl DocumentField {
    fn content(&self) -> Option<&str> {
        self.content.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn text(&self) -> Option<String> {
        self.value_string
            .as_deref()
            .or(self.value_phone_number.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| self.content())
            .map(str::to_string)
    }

    fn amount(&self) -> Option<f64> {
        self.value_currency
            .as_ref()
            .and_then(|c| c.amount)
            .or(self.value_number)
            .or(self.value_integer.map(|n| n as f64))
            .or_else(|| self.content().and_then(parse_amount))
    }

    fn date(&self) -> Option<String> {
        self.value_date
            .as_deref()
            .and_then(normalize_date)
            .or_else(|| self.content().and_then(normalize_date))
    }

    fn time(&self) -> Option<String> {
        self.value_time
            .clone()
            .or_else(|| self.content().map(str::to_string))
    }

    fn currency_code(&self) -> Option<String> {
        self.value_currency
            .as_ref()
            .and_then(|c| c.currency_code.as_deref())
            .and_then(normalize_currency)
    }
}

/// Mean of the reported confidence scores, 0.0 when there are none.
///
/// A zero score counts as not reported.
pub fn mean_confidence(scores: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = scores
        .into_iter()
        .filter(|s| *s > 0.0)
        .fold((0.0, 0usize), |(sum, count), s| (sum + s, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn receipt_from_analysis(result: &AnalyzeResult) -> Result<(ParsedReceipt, f64), ProviderError> {
    let document = result
        .documents
        .first()
        .ok_or_else(|| ProviderError::Failed("No receipt data found in document".to_string()))?;
    let fields = &document.fields;
    let field = |name: &str| fields.get(name);

    let total = field("Total");
    let currency = field("Currency")
        .and_then(|f| f.text())
        .and_then(|c| normalize_currency(&c))
        .or_else(|| total.and_then(DocumentField::currency_code));

    let items = field("Items")
        .map(|f| f.value_array.iter().filter_map(item_from_field).collect())
        .unwrap_or_default();

    let field_confidence: BTreeMap<String, f64> = fields
        .iter()
        .filter_map(|(name, f)| {
            f.confidence
                .filter(|c| *c > 0.0)
                .map(|c| (name.clone(), c))
        })
        .collect();
    let confidence = mean_confidence(field_confidence.values().copied());

    let receipt = ParsedReceipt {
        merchant: field("MerchantName").and_then(DocumentField::text),
        total_amount: total.and_then(DocumentField::amount),
        date: field("TransactionDate").and_then(DocumentField::date),
        tax_amount: field("TotalTax").and_then(DocumentField::amount),
        currency,
        items,
        merchant_address: field("MerchantAddress").and_then(|f| f.content().map(str::to_string)),
        merchant_phone: field("MerchantPhoneNumber").and_then(DocumentField::text),
        time: field("TransactionTime").and_then(DocumentField::time),
        subtotal: field("Subtotal").and_then(DocumentField::amount),
        tip_amount: field("Tip").and_then(DocumentField::amount),
        field_confidence,
    };

    Ok((receipt, confidence))
}

fn item_from_field(field: &DocumentField) -> Option<ReceiptItem> {
    let props = &field.value_object;
    let name = props
        .get("Description")
        .or_else(|| props.get("Name"))
        .and_then(DocumentField::text)
        .unwrap_or_default();
    let quantity = props
        .get("Quantity")
        .and_then(|f| f.value_number.or(f.value_integer.map(|n| n as f64)));
    let unit_price = props.get("Price").and_then(DocumentField::amount);
    let price = props
        .get("TotalPrice")
        .and_then(DocumentField::amount)
        .or_else(|| unit_price.map(|p| p * quantity.unwrap_or(1.0)))?;

    Some(ReceiptItem {
        name,
        price,
        quantity,
        unit_price,
    })
}
