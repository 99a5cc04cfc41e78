//! Receipt extraction providers and the fallback pipeline.
//!
//! Supports multiple providers:
//! - OCR.space (text recognition + LLM parsing)
//! - Azure Computer Vision Read (text recognition + LLM parsing)
//! - Azure Form Recognizer prebuilt receipt model (structured fields)

mod api_backend;
mod azure_read;
mod azure_receipt;
mod backend;
mod fallback;
mod ocr_space;
mod staged;

pub use api_backend::{sniff_extension, PollPolicy};
pub use azure_read::AzureReadBackend;
pub use azure_receipt::{mean_confidence, AzureReceiptBackend};
pub use backend::{ProviderError, ReceiptProvider, TextExtractor};
pub use fallback::{ExcludedProvider, ReceiptPipeline};
pub use ocr_space::OcrSpaceBackend;
pub use staged::StagedProvider;
