//! One-shot receipt scan.

use std::path::Path;

use console::style;

use crate::config::Config;
use crate::ocr::ReceiptPipeline;
use crate::receipt::ReceiptExtractionResult;

/// Scan a single file and print the result.
pub async fn cmd_scan(config: &Config, file: &Path, json: bool) -> anyhow::Result<()> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }

    let pipeline = ReceiptPipeline::from_config(config);
    if pipeline.is_empty() {
        eprintln!(
            "{} No receipt providers are configured (run `receiptflow providers`)",
            style("!").yellow()
        );
    }

    let result = pipeline.process(file).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(result: &ReceiptExtractionResult) {
    let Some(parsed) = result.parsed_data() else {
        println!(
            "{} {}",
            style("✗").red(),
            result.error().unwrap_or("Receipt processing failed")
        );
        if let Some(raw) = result.raw_output() {
            println!("  {} {}", style("Model output:").dim(), raw);
        }
        return;
    };

    let provider = result.provider().map(|p| p.as_str()).unwrap_or("unknown");
    println!(
        "{} Receipt extracted by {}",
        style("✓").green(),
        style(provider).cyan()
    );

    let amount = |value: Option<f64>| value.map(|v| format!("{:.2}", v));
    let rows = [
        ("Merchant", parsed.merchant.clone()),
        ("Date", parsed.date.clone()),
        ("Total", amount(parsed.total_amount)),
        ("Tax", amount(parsed.tax_amount)),
        ("Currency", parsed.currency.clone()),
    ];
    for (label, value) in rows {
        println!(
            "  {:<10} {}",
            style(label).bold(),
            value.as_deref().unwrap_or("-")
        );
    }

    if let Some(confidence) = result.confidence() {
        println!("  {:<10} {:.0}%", style("Confidence").bold(), confidence * 100.0);
    }

    if !parsed.items.is_empty() {
        println!("\n  {}", style("Items:").cyan());
        for item in &parsed.items {
            println!("    {:<32} {:>10.2}", item.name, item.price);
        }
    }
}
