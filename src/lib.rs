//! receiptflow - receipt extraction with ordered provider fallback.
//!
//! A receipt image or PDF is run through a chain of providers (OCR.space,
//! Azure Read, Azure Form Recognizer) until one yields structured data.
//! OCR-only providers hand their text to an LLM parser that returns the
//! merchant, total, date, tax, currency and line items.

pub mod cli;
pub mod config;
pub mod llm;
pub mod ocr;
pub mod rate_limit;
pub mod receipt;
pub mod server;
