//! Provider chain status.

use console::style;

use crate::config::Config;
use crate::ocr::ReceiptPipeline;

/// Print the configured chain and why any provider was left out.
pub fn cmd_providers(config: &Config) -> anyhow::Result<()> {
    let (pipeline, excluded) = ReceiptPipeline::from_config_with_report(config);

    if let Some(path) = &config.source_path {
        println!("{} {}", style("Config:").dim(), path.display());
    }

    println!("\n{}", style("Receipt Providers").bold());
    println!("  Chain: {}", style(pipeline.describe()).cyan());

    println!();
    for kind in &config.pipeline.providers {
        match excluded.iter().find(|e| e.kind == *kind) {
            None => println!("  {:<14} {}", kind.as_str(), style("✓ available").green()),
            Some(e) => {
                println!("  {:<14} {}", kind.as_str(), style("✗ not available").red());
                println!("  {:<14} {}", "", style(&e.reason).dim());
            }
        }
    }

    let key_note = if config.llm.has_api_key() {
        style("").dim()
    } else {
        style(" (no API key)").yellow()
    };
    println!(
        "\n  {} {}{}",
        style("Parser model:").dim(),
        config.llm.model,
        key_note
    );
    Ok(())
}
