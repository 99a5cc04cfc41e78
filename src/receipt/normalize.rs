//! Locale normalization for values read off receipts.
//!
//! OCR output and language-model answers carry dates and amounts in
//! whatever format the receipt used. These helpers coerce them into
//! ISO dates, plain numbers and ISO currency codes.

use chrono::{Datelike, NaiveDate};

/// Formats with a four-digit year. Month-first comes before day-first so
/// ambiguous US-style dates read as month/day.
const FULL_YEAR_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const SHORT_YEAR_FORMATS: &[&str] = &["%m/%d/%y", "%d/%m/%y", "%d.%m.%y", "%m-%d-%y"];

/// Normalize a receipt date to `YYYY-MM-DD`.
///
/// Returns `None` when the text is not recognizable as a date.
pub fn normalize_date(text: &str) -> Option<String> {
    let cleaned = clean_date(text)?;

    // ISO date-times: keep the date part
    if let Some(head) = cleaned.get(..10) {
        let rest = &cleaned[10..];
        if rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ') {
            if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Some(iso(date));
            }
        }
    }

    for fmt in FULL_YEAR_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            // chrono accepts two-digit input for %Y as year 0024
            if date.year() >= 1900 {
                return Some(iso(date));
            }
        }
    }

    SHORT_YEAR_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .map(iso)
}

fn clean_date(text: &str) -> Option<String> {
    let trimmed = text.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        return None;
    }
    // "2024. 03. 14." is common on Hungarian receipts
    let collapsed = trimmed.replace(". ", ".");
    Some(collapsed.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a monetary amount such as `$12.50`, `1.234,56 Ft` or `12,50`.
pub fn parse_amount(text: &str) -> Option<f64> {
    let negative = text.trim_start().starts_with('-');
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let kept = kept.trim_matches(|c| c == '.' || c == ',');
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (kept.rfind('.'), kept.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => kept.replace(',', ""),
        (Some(_), Some(_)) => kept.replace('.', "").replace(',', "."),
        (None, Some(_)) => resolve_single_separator(kept, ','),
        (Some(_), None) => resolve_single_separator(kept, '.'),
        (None, None) => kept.to_string(),
    };

    let value: f64 = normalized.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Decide whether a lone separator kind is decimal or grouping.
///
/// Repeated separators are always grouping. A single separator followed by
/// exactly three digits is grouping too (`1,234`, `1.299`), unless the
/// integer part is zero (`0.125`).
fn resolve_single_separator(text: &str, sep: char) -> String {
    let count = text.matches(sep).count();
    if count > 1 {
        return text.replace(sep, "");
    }
    let (whole, decimals) = text.split_once(sep).unwrap_or((text, ""));
    if decimals.len() == 3 && !whole.trim_start_matches('0').is_empty() {
        text.replace(sep, "")
    } else {
        text.replace(sep, ".")
    }
}

/// Normalize a currency to its ISO code where one can be inferred.
pub fn normalize_currency(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let code = match trimmed {
        "$" | "US$" => "USD",
        "€" => "EUR",
        "£" => "GBP",
        "¥" => "JPY",
        "zł" => "PLN",
        "Ft" | "ft" | "FT" => "HUF",
        other => return Some(other.to_uppercase()),
    };
    Some(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_date_formats() {
        assert_eq!(normalize_date("2024-03-14").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("03/14/2024").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("14/03/2024").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("14.03.2024").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("2024.03.14.").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("2024. 03. 14.").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("March 14, 2024").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("14 Mar 2024").as_deref(), Some("2024-03-14"));
        assert_eq!(
            normalize_date("2024-03-14T09:30:00Z").as_deref(),
            Some("2024-03-14")
        );
    }

    #[test]
    fn test_normalize_date_short_year() {
        assert_eq!(normalize_date("03/14/24").as_deref(), Some("2024-03-14"));
        assert_eq!(normalize_date("14.03.24").as_deref(), Some("2024-03-14"));
    }

    #[test]
    fn test_ambiguous_date_reads_month_first() {
        assert_eq!(normalize_date("03/04/2024").as_deref(), Some("2024-03-04"));
    }

    #[test]
    fn test_normalize_date_rejects_garbage() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("yesterday"), None);
        assert_eq!(normalize_date("13/13/2024"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("12.50"), Some(12.5));
        assert_eq!(parse_amount("$12.50"), Some(12.5));
        assert_eq!(parse_amount("12,50"), Some(12.5));
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("1.234,56 EUR"), Some(1234.56));
        assert_eq!(parse_amount("1 234 Ft"), Some(1234.0));
        assert_eq!(parse_amount("1,234"), Some(1234.0));
        assert_eq!(parse_amount("1.234.567"), Some(1234567.0));
        assert_eq!(parse_amount("1.299 Ft"), Some(1299.0));
        assert_eq!(parse_amount("1,299 Ft"), Some(1299.0));
        assert_eq!(parse_amount("0.125"), Some(0.125));
        assert_eq!(parse_amount("-3.20"), Some(-3.2));
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency("$").as_deref(), Some("USD"));
        assert_eq!(normalize_currency(" huf ").as_deref(), Some("HUF"));
        assert_eq!(normalize_currency("Ft").as_deref(), Some("HUF"));
        assert_eq!(normalize_currency("€").as_deref(), Some("EUR"));
        assert_eq!(normalize_currency("  "), None);
    }
}
