//! Configuration management for receiptflow using the prefer crate.
//!
//! A config file (TOML, YAML or JSON) is discovered with `prefer` or given
//! explicitly; environment variables are applied on top. Every provider
//! credential is an explicit named setting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::llm::LlmConfig;
use crate::ocr::PollPolicy;
use crate::receipt::ProviderKind;

/// Environment lookup, injectable for tests.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a non-empty variable from the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Errors loading an explicit configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Where uploads are staged while processed (system temp dir if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_dir: Option<PathBuf>,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
            upload_dir: None,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Directory uploads are staged in.
    pub fn upload_dir(&self) -> PathBuf {
        self.upload_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Fallback chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Providers in priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderKind>,
    /// Delay between status polls of asynchronous Azure operations.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of status polls per operation.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Wall-clock limit for one asynchronous operation.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_providers() -> Vec<ProviderKind> {
    ProviderKind::ALL.to_vec()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    120
}

fn default_poll_timeout_secs() -> u64 {
    120
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_polls.max(1),
            deadline: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}

/// OCR.space settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSpaceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_ocr_space_endpoint")]
    pub endpoint: String,
    /// OCR.space language code (e.g. "hun", "eng").
    #[serde(default = "default_ocr_space_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub detect_tables: bool,
    #[serde(default = "default_ocr_space_engine")]
    pub engine: u8,
    #[serde(default = "default_ocr_space_timeout")]
    pub timeout_secs: u64,
}

fn default_ocr_space_endpoint() -> String {
    "https://api.ocr.space/parse/image".to_string()
}

fn default_ocr_space_language() -> String {
    "hun".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ocr_space_engine() -> u8 {
    1
}

fn default_ocr_space_timeout() -> u64 {
    30
}

impl Default for OcrSpaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_ocr_space_endpoint(),
            language: default_ocr_space_language(),
            detect_tables: true,
            engine: default_ocr_space_engine(),
            timeout_secs: default_ocr_space_timeout(),
        }
    }
}

/// Azure Computer Vision (Read API) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureVisionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default = "default_azure_timeout")]
    pub timeout_secs: u64,
}

fn default_azure_timeout() -> u64 {
    30
}

impl Default for AzureVisionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: None,
            timeout_secs: default_azure_timeout(),
        }
    }
}

/// Azure Form Recognizer (Document Intelligence) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureFormConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default = "default_form_model")]
    pub model_id: String,
    #[serde(default = "default_form_api_version")]
    pub api_version: String,
    #[serde(default = "default_azure_timeout")]
    pub timeout_secs: u64,
}

fn default_form_model() -> String {
    "prebuilt-receipt".to_string()
}

fn default_form_api_version() -> String {
    "2023-07-31".to_string()
}

impl Default for AzureFormConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: None,
            model_id: default_form_model(),
            api_version: default_form_api_version(),
            timeout_secs: default_azure_timeout(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ocr_space: OcrSpaceConfig,
    #[serde(default)]
    pub azure_vision: AzureVisionConfig,
    #[serde(default)]
    pub azure_form: AzureFormConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// File this config was read from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration and apply environment overrides.
    ///
    /// An explicit path must exist and parse. Without one, `prefer`
    /// discovers `receiptflow.{toml,yaml,json}` in the usual places and
    /// defaults are used when nothing is found.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load_from_path(path).await?,
            None => Self::discover().await,
        };
        Ok(config.with_env_overrides(&process_env))
    }

    async fn discover() -> Self {
        match prefer::load("receiptflow").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Ignoring unreadable config: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Format is chosen by extension; anything else is read as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars (in addition to the `LLM_*` ones):
    /// - `HOST`, `PORT`, `CORS_ORIGINS` (comma separated)
    /// - `RECEIPT_PROVIDERS`: comma separated provider order
    /// - `OCR_API_KEY`, `OCR_SPACE_LANGUAGE`
    /// - `AZURE_VISION_ENDPOINT`, `AZURE_VISION_KEY`
    /// - `AZURE_FORM_RECOGNIZER_ENDPOINT`, `AZURE_FORM_RECOGNIZER_KEY`
    pub fn with_env_overrides(mut self, env: EnvLookup<'_>) -> Self {
        if let Some(host) = env("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(origins) = env("CORS_ORIGINS") {
            self.server.cors_origins = split_list(&origins);
        }
        if let Some(list) = env("RECEIPT_PROVIDERS") {
            self.pipeline.providers = parse_provider_list(&list);
        }

        if let Some(key) = env("OCR_API_KEY") {
            self.ocr_space.api_key = Some(key);
        }
        if let Some(language) = env("OCR_SPACE_LANGUAGE") {
            self.ocr_space.language = language;
        }

        if let Some(endpoint) = env("AZURE_VISION_ENDPOINT") {
            self.azure_vision.endpoint = Some(endpoint);
        }
        if let Some(key) = env("AZURE_VISION_KEY") {
            self.azure_vision.key = Some(key);
        }

        if let Some(endpoint) = env("AZURE_FORM_RECOGNIZER_ENDPOINT") {
            self.azure_form.endpoint = Some(endpoint);
        }
        if let Some(key) = env("AZURE_FORM_RECOGNIZER_KEY") {
            self.azure_form.key = Some(key);
        }

        self.llm = self.llm.with_env_overrides(env);
        self
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma separated provider list, skipping unknown names.
pub fn parse_provider_list(value: &str) -> Vec<ProviderKind> {
    let mut providers = Vec::new();
    for name in split_list(value) {
        match ProviderKind::from_name(&name) {
            Some(kind) if !providers.contains(&kind) => providers.push(kind),
            Some(_) => {}
            None => warn!("Unknown receipt provider '{}' ignored", name),
        }
    }
    providers
}
