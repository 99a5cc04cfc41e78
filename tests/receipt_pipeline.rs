//! End-to-end tests of the fallback chain with in-memory providers.
//!
//! OCR is simulated by reading the fixture file as text, and the language
//! model by a scripted chat model, so no network is touched.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use receiptflow::config::Config;
use receiptflow::llm::{ChatModel, ChatRequest, LlmConfig, LlmError};
use receiptflow::ocr::{
    ProviderError, ReceiptPipeline, ReceiptProvider, StagedProvider, TextExtractor,
};
use receiptflow::receipt::{
    ParsedReceipt, ProviderKind, ReceiptExtractionResult, ReceiptParser, ALL_PROVIDERS_FAILED,
};
use tempfile::NamedTempFile;

/// "OCR" that returns the file's contents.
struct FileTextExtractor {
    kind: ProviderKind,
    calls: AtomicUsize,
}

impl FileTextExtractor {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextExtractor for FileTextExtractor {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn extract_text(&self, path: &Path) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = tokio::fs::read_to_string(path).await?;
        if text.trim().is_empty() {
            return Err(ProviderError::NoText);
        }
        Ok(text)
    }
}

/// OCR that always fails.
struct BrokenExtractor;

#[async_trait]
impl TextExtractor for BrokenExtractor {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OcrSpace
    }

    async fn extract_text(&self, _path: &Path) -> Result<String, ProviderError> {
        Err(ProviderError::RateLimited {
            provider: ProviderKind::OcrSpace,
            retry_after_secs: Some(30),
        })
    }
}

/// Chat model that replays answers in order and records the prompts.
struct ScriptedModel {
    answers: Vec<&'static str>,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(answers: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            answers,
            prompts: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let mut prompts = self.prompts.lock().unwrap();
        let index = prompts.len();
        prompts.push(request.messages.last().unwrap().content.clone());
        self.answers
            .get(index)
            .map(|a| a.to_string())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Document-model stand-in that succeeds with fixed data.
struct FixedDocumentModel {
    calls: AtomicUsize,
}

#[async_trait]
impl ReceiptProvider for FixedDocumentModel {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureForm
    }

    async fn extract(&self, _path: &Path) -> ReceiptExtractionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let parsed = ParsedReceipt {
            merchant: Some("Contoso".to_string()),
            total_amount: Some(1203.39),
            ..Default::default()
        };
        ReceiptExtractionResult::success(ProviderKind::AzureForm, None, parsed, Some(0.88))
    }
}

fn fixture(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn parser(model: Arc<ScriptedModel>) -> Arc<ReceiptParser> {
    Arc::new(ReceiptParser::new(model, &LlmConfig::default()))
}

#[tokio::test]
async fn rate_limited_ocr_falls_through_to_next_provider() {
    let receipt = fixture("SPAR Budapest\n2024. 03. 14.\nÖSSZESEN 1.234,56 Ft");
    let model = ScriptedModel::new(vec![
        "```json\n{\"merchant\": \"SPAR\", \"total_amount\": \"1.234,56\", \"date\": \"2024. 03. 14.\", \"currency\": \"Ft\", \"items\": []}\n```",
    ]);
    let shared = parser(model.clone());

    let pipeline = ReceiptPipeline::new(vec![
        Arc::new(StagedProvider::new(Box::new(BrokenExtractor), shared.clone())),
        Arc::new(StagedProvider::new(
            Box::new(FileTextExtractor::new(ProviderKind::AzureVision)),
            shared,
        )),
    ]);

    let result = pipeline.process(receipt.path()).await;

    assert!(result.is_success(), "unexpected failure: {:?}", result.error());
    assert_eq!(result.provider(), Some(ProviderKind::AzureVision));
    assert!(result.ocr_text().unwrap().contains("ÖSSZESEN"));

    let parsed = result.parsed_data().unwrap();
    assert_eq!(parsed.merchant.as_deref(), Some("SPAR"));
    assert_eq!(parsed.total_amount, Some(1234.56));
    assert_eq!(parsed.date.as_deref(), Some("2024-03-14"));
    assert_eq!(parsed.currency.as_deref(), Some("HUF"));

    // The broken OCR never reached the model.
    assert_eq!(model.prompts().len(), 1);
}

#[tokio::test]
async fn parse_failure_hands_over_to_document_model() {
    let receipt = fixture("TOTAL 5.00");
    let model = ScriptedModel::new(vec!["Sorry, I cannot help with that."]);
    let document_model = Arc::new(FixedDocumentModel {
        calls: AtomicUsize::new(0),
    });

    let pipeline = ReceiptPipeline::new(vec![
        Arc::new(StagedProvider::new(
            Box::new(FileTextExtractor::new(ProviderKind::OcrSpace)),
            parser(model),
        )),
        document_model.clone(),
    ]);

    let result = pipeline.process(receipt.path()).await;

    assert!(result.is_success());
    assert_eq!(result.provider(), Some(ProviderKind::AzureForm));
    assert_eq!(result.confidence(), Some(0.88));
    assert!(result.raw_output().is_none());
    assert_eq!(document_model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn long_ocr_text_is_truncated_before_parsing() {
    let long_text = format!("MERCHANT\n{}", "x".repeat(10_000));
    let receipt = fixture(&long_text);
    let model = ScriptedModel::new(vec![r#"{"merchant": "MERCHANT"}"#]);

    let pipeline = ReceiptPipeline::new(vec![Arc::new(StagedProvider::new(
        Box::new(FileTextExtractor::new(ProviderKind::OcrSpace)),
        parser(model.clone()),
    ))]);

    let result = pipeline.process(receipt.path()).await;
    assert!(result.is_success());

    let prompt = &model.prompts()[0];
    assert!(prompt.contains("MERCHANT"));
    assert!(!prompt.contains(&"x".repeat(3000)));
}

#[tokio::test]
async fn exhausted_chain_serializes_to_the_documented_shape() {
    let receipt = fixture("   ");
    let pipeline = ReceiptPipeline::new(vec![Arc::new(StagedProvider::new(
        Box::new(FileTextExtractor::new(ProviderKind::OcrSpace)),
        parser(ScriptedModel::new(Vec::new())),
    ))]);

    let result = pipeline.process(receipt.path()).await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(
        json,
        serde_json::json!({
            "success": false,
            "ocr_text": null,
            "parsed_data": null,
            "confidence": null,
            "error": ALL_PROVIDERS_FAILED,
        })
    );
}

#[test]
fn config_file_and_env_choose_the_chain() {
    let config = Config::parse(
        r#"
[pipeline]
providers = ["azure_form", "ocr_space"]

[azure_form]
endpoint = "https://receipts.cognitiveservices.azure.com"
key = "form-key"

[ocr_space]
api_key = "K123"
"#,
        "toml",
    )
    .unwrap();

    // No LLM key yet: only the document model can run.
    let chain = ReceiptPipeline::from_config(&config);
    assert_eq!(chain.providers(), vec![ProviderKind::AzureForm]);

    let env = |key: &str| match key {
        "GROQ_API_KEY" => Some("gsk_test".to_string()),
        "RECEIPT_PROVIDERS" => Some("ocr-space, azure_form".to_string()),
        _ => None,
    };
    let config = config.with_env_overrides(&env);
    let chain = ReceiptPipeline::from_config(&config);
    assert_eq!(chain.describe(), "ocr_space -> azure_form");
}
