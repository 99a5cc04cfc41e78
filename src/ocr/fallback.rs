//! Receipt pipeline that tries multiple providers in sequence.
//!
//! Providers run one at a time in priority order. The first successful
//! extraction wins; a failing or panicking provider hands over to the next.
//! When none succeed the caller gets a single "all methods failed" result.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::azure_read::AzureReadBackend;
use super::azure_receipt::AzureReceiptBackend;
use super::backend::{ProviderError, ReceiptProvider};
use super::ocr_space::OcrSpaceBackend;
use super::staged::StagedProvider;
use crate::config::Config;
use crate::llm::OpenAiChatClient;
use crate::receipt::{ProviderKind, ReceiptExtractionResult, ReceiptParser};

/// An ordered chain of receipt providers.
pub struct ReceiptPipeline {
    providers: Vec<Arc<dyn ReceiptProvider>>,
}

/// A provider left out of the chain, and why.
#[derive(Debug)]
pub struct ExcludedProvider {
    pub kind: ProviderKind,
    pub reason: ProviderError,
}

impl ReceiptPipeline {
    /// Create a pipeline over already-built providers, in priority order.
    pub fn new(providers: Vec<Arc<dyn ReceiptProvider>>) -> Self {
        info!(
            "Receipt pipeline initialized with {} providers",
            providers.len()
        );
        Self { providers }
    }

    /// Build the chain from configuration, skipping unconfigured providers.
    pub fn from_config(config: &Config) -> Self {
        Self::from_config_with_report(config).0
    }

    /// Like [`from_config`](Self::from_config), also returning the
    /// providers that were left out.
    pub fn from_config_with_report(config: &Config) -> (Self, Vec<ExcludedProvider>) {
        let parser = match OpenAiChatClient::new(config.llm.clone()) {
            Ok(client) => Some(Arc::new(ReceiptParser::new(Arc::new(client), &config.llm))),
            Err(e) => {
                debug!("Receipt parser unavailable: {}", e);
                None
            }
        };

        let mut providers: Vec<Arc<dyn ReceiptProvider>> = Vec::new();
        let mut excluded = Vec::new();
        for &kind in &config.pipeline.providers {
            match Self::create_provider(kind, config, parser.as_ref()) {
                Ok(provider) => {
                    debug!("Receipt chain: added {} provider", kind);
                    providers.push(provider);
                }
                Err(reason) => {
                    debug!("Receipt chain: {} not available ({})", kind, reason);
                    excluded.push(ExcludedProvider { kind, reason });
                }
            }
        }

        (Self::new(providers), excluded)
    }

    fn create_provider(
        kind: ProviderKind,
        config: &Config,
        parser: Option<&Arc<ReceiptParser>>,
    ) -> Result<Arc<dyn ReceiptProvider>, ProviderError> {
        let poll = config.pipeline.poll_policy();
        match kind {
            ProviderKind::OcrSpace => {
                let backend = OcrSpaceBackend::new(config.ocr_space.clone())?;
                Ok(Arc::new(StagedProvider::new(
                    Box::new(backend),
                    require_parser(parser)?,
                )))
            }
            ProviderKind::AzureVision => {
                let backend = AzureReadBackend::new(&config.azure_vision, poll)?;
                Ok(Arc::new(StagedProvider::new(
                    Box::new(backend),
                    require_parser(parser)?,
                )))
            }
            ProviderKind::AzureForm => {
                Ok(Arc::new(AzureReceiptBackend::new(&config.azure_form, poll)?))
            }
        }
    }

    /// Providers in the chain, in the order they are tried.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// Check if the chain has no providers at all.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Human-readable chain, e.g. `ocr_space -> azure_form`.
    pub fn describe(&self) -> String {
        if self.providers.is_empty() {
            return "(none)".to_string();
        }
        self.providers()
            .iter()
            .map(ProviderKind::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Run the file through each provider until one succeeds.
    pub async fn process(&self, path: &Path) -> ReceiptExtractionResult {
        for provider in &self.providers {
            let kind = provider.kind();
            info!("Trying receipt provider {}", kind);

            match AssertUnwindSafe(provider.extract(path)).catch_unwind().await {
                Ok(result) if result.is_success() => {
                    info!("Receipt processed by {} provider", kind);
                    return result;
                }
                Ok(result) => {
                    warn!(
                        "Receipt provider {} failed: {}",
                        kind,
                        result.error().unwrap_or("unknown error")
                    );
                }
                Err(panic) => {
                    warn!(
                        "Receipt provider {} panicked: {}",
                        kind,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        warn!(
            "All {} receipt providers failed for {}",
            self.providers.len(),
            path.display()
        );
        ReceiptExtractionResult::exhausted()
    }
}

fn require_parser(
    parser: Option<&Arc<ReceiptParser>>,
) -> Result<Arc<ReceiptParser>, ProviderError> {
    parser.cloned().ok_or_else(|| {
        ProviderError::Unavailable("LLM_API_KEY or GROQ_API_KEY not set".to_string())
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
