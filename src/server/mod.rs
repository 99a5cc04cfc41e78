//! Web server for scanning receipts.
//!
//! Exposes the fallback pipeline over HTTP:
//! - `GET /api/health`
//! - `POST /api/receipts/scan` (multipart, field `image` or `file`)
//! - `POST /api/receipts/scan/base64` (JSON `{image}`)

mod handlers;
mod routes;

pub use handlers::{decode_image_data, UploadError};
pub use routes::create_router;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, ServerConfig};
use crate::ocr::ReceiptPipeline;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReceiptPipeline>,
    /// Where uploads are staged while being processed.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn new(pipeline: ReceiptPipeline, server: &ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            upload_dir: server.upload_dir(),
            max_upload_bytes: server.max_upload_bytes,
            cors_origins: server.cors_origins.clone(),
        }
    }

    /// Build the pipeline from config and make sure the upload dir exists.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let state = Self::new(ReceiptPipeline::from_config(config), &config.server);
        tokio::fs::create_dir_all(&state.upload_dir).await?;
        Ok(state)
    }
}

/// Start the web server.
pub async fn serve(config: &Config, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    if state.pipeline.is_empty() {
        tracing::warn!("No receipt providers are configured; every scan will fail");
    }
    tracing::info!("Receipt chain: {}", state.pipeline.describe());

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
