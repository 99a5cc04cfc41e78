//! Language-model parser turning raw OCR text into a [`ParsedReceipt`].
//!
//! The model is asked for a strict JSON object. Its answer is decoded in
//! two tiers: strict decoding after stripping code fences, then recovery of
//! the first brace-delimited object. Decoded values are normalized so that
//! dates come out as ISO strings and amounts as numbers.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::normalize::{normalize_currency, normalize_date, parse_amount};
use super::{ParsedReceipt, ReceiptItem};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmConfig, LlmError};

const SYSTEM_PROMPT: &str = "You are a precise data extraction assistant. \
Always return valid JSON without any additional text or explanations.";

const EXTRACTION_PROMPT: &str = r#"Extract the following fields from this receipt text and answer with a single JSON object:
- merchant (string): the store or business name
- total_amount (number): the total amount paid
- date (string): the transaction date in YYYY-MM-DD format
- items (array of objects): each with "name" (string) and "price" (number)
- tax_amount (number): the tax amount, if shown
- currency (string): the currency code, if it can be determined

Rules:
- Use null for any field that cannot be found
- Amounts must be plain numbers without currency symbols
- Return ONLY the JSON object, no other text

Receipt text:
"#;

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z0-9_-]*\s*").expect("valid regex"));
static FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```\s*$").expect("valid regex"));
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// The model answered, but not with a usable JSON object.
#[derive(Debug, Error)]
#[error("Failed to parse AI response: {message}")]
pub struct DecodeError {
    pub message: String,
    /// The unmodified model output.
    pub raw_output: String,
}

/// Errors from [`ReceiptParser::parse`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("AI processing failed: {0}")]
    Model(#[from] LlmError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ParseError {
    /// Raw model output, when the model answered at all.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            ParseError::Decode(e) => Some(&e.raw_output),
            ParseError::Model(_) => None,
        }
    }
}

/// Structured parser backed by a chat model.
pub struct ReceiptParser {
    model: Arc<dyn ChatModel>,
    temperature: f32,
    max_tokens: u32,
    max_content_chars: usize,
}

impl ReceiptParser {
    pub fn new(model: Arc<dyn ChatModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_content_chars: config.max_content_chars,
        }
    }

    /// Name of the underlying model.
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Build the chat request for a piece of OCR text.
    pub fn build_request(&self, ocr_text: &str) -> ChatRequest {
        let text = truncate_chars(ocr_text, self.max_content_chars);
        ChatRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(format!("{}{}\n\nJSON:", EXTRACTION_PROMPT, text)),
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Parse OCR text into a structured receipt.
    pub async fn parse(&self, ocr_text: &str) -> Result<ParsedReceipt, ParseError> {
        let request = self.build_request(ocr_text);
        debug!(
            model = self.model.model_name(),
            chars = ocr_text.chars().count(),
            "parsing receipt text"
        );
        let raw = self.model.complete(&request).await?;
        decode_receipt(&raw).map_err(|e| {
            warn!("Model output was not valid receipt JSON: {}", e.message);
            ParseError::from(e)
        })
    }
}

/// First `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(raw: &str) -> String {
    let opened = FENCE_OPEN.replace(raw.trim(), "");
    FENCE_CLOSE.replace(&opened, "").trim().to_string()
}

/// Decode model output into a normalized receipt.
pub fn decode_receipt(raw: &str) -> Result<ParsedReceipt, DecodeError> {
    let cleaned = strip_code_fences(raw);

    let first_error = match decode_object(&cleaned) {
        Ok(map) => return Ok(receipt_from_map(&map)),
        Err(e) => e,
    };

    if let Some(found) = JSON_OBJECT.find(&cleaned) {
        if let Ok(map) = decode_object(found.as_str()) {
            debug!("Recovered JSON object from surrounding model text");
            return Ok(receipt_from_map(&map));
        }
    }

    Err(DecodeError {
        message: first_error,
        raw_output: raw.to_string(),
    })
}

fn decode_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn receipt_from_map(map: &Map<String, Value>) -> ParsedReceipt {
    ParsedReceipt {
        merchant: map.get("merchant").and_then(string_value),
        total_amount: map.get("total_amount").and_then(amount_value),
        date: map
            .get("date")
            .and_then(string_value)
            .and_then(|d| normalize_date(&d)),
        tax_amount: map.get("tax_amount").and_then(amount_value),
        currency: map
            .get("currency")
            .and_then(string_value)
            .and_then(|c| normalize_currency(&c)),
        items: map
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(item_from_value).collect())
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn item_from_value(value: &Value) -> Option<ReceiptItem> {
    let obj = value.as_object()?;
    let name = obj
        .get("name")
        .or_else(|| obj.get("description"))
        .and_then(string_value)
        .unwrap_or_default();
    let Some(price) = obj
        .get("price")
        .or_else(|| obj.get("total_price"))
        .and_then(amount_value)
    else {
        debug!("Dropping receipt item without a price: {:?}", name);
        return None;
    };
    Some(ReceiptItem::new(name, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, fn() -> LlmError>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        fn answering(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn parser_with(model: Arc<ScriptedModel>) -> ReceiptParser {
        ReceiptParser::new(model, &LlmConfig::default())
    }

    #[tokio::test]
    async fn test_total_and_date_are_normalized() {
        let model = Arc::new(ScriptedModel::answering(
            r#"{"merchant":"Corner Shop","total_amount":"12.50","date":"03/14/2024","items":[],"tax_amount":null,"currency":"$"}"#,
        ));
        let parser = parser_with(model.clone());

        let parsed = parser
            .parse("CORNER SHOP\n03/14/2024\nMilk 12.50\nTotal: 12.50")
            .await
            .unwrap();

        assert_eq!(parsed.total_amount, Some(12.50));
        assert_eq!(parsed.date.as_deref(), Some("2024-03-14"));
        assert_eq!(parsed.currency.as_deref(), Some("USD"));
        assert_eq!(parsed.merchant.as_deref(), Some("Corner Shop"));

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].messages[1].content.contains("Total: 12.50"));
        assert!((requests[0].temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(requests[0].max_tokens, 500);
    }

    #[tokio::test]
    async fn test_input_is_truncated() {
        let model = Arc::new(ScriptedModel::answering("{}"));
        let parser = parser_with(model.clone());

        let long_text = format!("{}{}", "é".repeat(3000), "TAIL-MARKER");
        parser.parse(&long_text).await.unwrap();

        let requests = model.requests.lock().unwrap();
        let prompt = &requests[0].messages[1].content;
        assert!(!prompt.contains("TAIL-MARKER"));
        assert_eq!(prompt.matches('é').count(), 3000);
    }

    #[tokio::test]
    async fn test_model_failure_has_no_raw_output() {
        let model = Arc::new(ScriptedModel {
            reply: Err(|| LlmError::Connection("refused".to_string())),
            requests: Mutex::new(Vec::new()),
        });
        let err = parser_with(model).parse("text").await.unwrap_err();
        assert!(matches!(err, ParseError::Model(_)));
        assert!(err.raw_output().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_answer_keeps_raw_output() {
        let model = Arc::new(ScriptedModel::answering("Sorry, I can't read that."));
        let err = parser_with(model).parse("text").await.unwrap_err();
        assert_eq!(err.raw_output(), Some("Sorry, I can't read that."));
        assert!(err.to_string().starts_with("Failed to parse AI response"));
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let parsed = decode_receipt("```json\n{\"merchant\":\"Shop\"}\n```").unwrap();
        assert_eq!(parsed.merchant.as_deref(), Some("Shop"));
        assert_eq!(parsed.total_amount, None);
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn test_bare_fence_is_stripped() {
        let parsed = decode_receipt("```\n{\"merchant\":\"Shop\"}```").unwrap();
        assert_eq!(parsed.merchant.as_deref(), Some("Shop"));
    }

    #[test]
    fn test_object_recovered_from_chatter() {
        let answer = "Here is the data: {\"merchant\": \"Aldi\", \"total_amount\": 3} Thanks!";
        let parsed = decode_receipt(answer).unwrap();
        assert_eq!(parsed.merchant.as_deref(), Some("Aldi"));
        assert_eq!(parsed.total_amount, Some(3.0));
    }

    #[test]
    fn test_non_object_is_rejected() {
        let err = decode_receipt("[1, 2, 3]").unwrap_err();
        assert_eq!(err.raw_output, "[1, 2, 3]");
    }

    #[test]
    fn test_items_tolerate_partial_data() {
        let parsed = decode_receipt(
            r#"{"items":[{"name":"Bread","price":"1,20"},{"name":"Mystery"},{"price":2}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.items,
            vec![ReceiptItem::new("Bread", 1.2), ReceiptItem::new("", 2.0)]
        );
    }

    #[test]
    fn test_unknown_date_is_dropped() {
        let parsed = decode_receipt(r#"{"date":"sometime in spring"}"#).unwrap();
        assert_eq!(parsed.date, None);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }
}
