//! Threshold evaluation
//!
//! Pure functions deciding pass/fail for a measured value against a
//! configured threshold. Percentage (`"40%"`) and byte-size (`"150 KB"`)
//! thresholds are parsed to plain numbers first and then compared the same
//! way as numeric ones.

use crate::types::{ReportItem, ThresholdLimit};

const UNITS: [(&str, f64); 6] = [
    ("pb", 1024f64 * 1024f64 * 1024f64 * 1024f64 * 1024f64),
    ("tb", 1024f64 * 1024f64 * 1024f64 * 1024f64),
    ("gb", 1024f64 * 1024f64 * 1024f64),
    ("mb", 1024f64 * 1024f64),
    ("kb", 1024f64),
    ("b", 1f64),
];

/// Decide whether `raw_value` passes `raw_threshold`
///
/// Always passes when `enforce` is false or no threshold is configured.
/// `Upper` fails iff the value is above the threshold, `Lower` fails iff it
/// is below.
pub fn evaluate(
    raw_value: f64,
    raw_threshold: Option<f64>,
    limit: ThresholdLimit,
    enforce: bool,
) -> bool {
    let threshold = match raw_threshold {
        Some(t) if enforce => t,
        _ => return true,
    };

    // NaN values are never judged
    match limit {
        ThresholdLimit::Upper => !(raw_value > threshold),
        ThresholdLimit::Lower => !(raw_value < threshold),
    }
}

/// Evaluate a leaf item against its own threshold fields
///
/// Items without a numeric raw value are not judged. A threshold without an
/// explicit limit is treated as a ceiling.
pub fn evaluate_item(item: &ReportItem, enforce: bool) -> bool {
    let value = match item.raw_value.as_ref().and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return true,
    };
    let threshold = item.raw_threshold.as_ref().and_then(|t| t.as_f64());
    let limit = item.threshold_limit.unwrap_or_default();

    evaluate(value, threshold, limit, enforce)
}

/// Parse a number, a percentage (`"40%"`) or a byte size (`"1.5 KB"`)
pub fn parse_numeric(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(pct) = parse_percentage(trimmed) {
        return Some(pct);
    }

    if let Ok(n) = trimmed.parse::<f64>() {
        return Some(n);
    }

    parse_bytes(trimmed)
}

/// Parse the numeric portion of a `"NN%"` string
pub fn parse_percentage(text: &str) -> Option<f64> {
    text.trim()
        .strip_suffix('%')
        .and_then(|n| n.trim().parse::<f64>().ok())
}

/// Parse a human byte string using base-1024 units (`"150 KB"` → 153600)
pub fn parse_bytes(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();

    for (unit, factor) in UNITS {
        if let Some(number) = lower.strip_suffix(unit) {
            // "kb" also ends with "b"; only accept a clean numeric prefix
            return number.trim().parse::<f64>().ok().map(|n| n * factor);
        }
    }

    None
}

/// Format a byte count with base-1024 units (`1536` → `"1.5 KB"`)
pub fn format_bytes(value: f64) -> String {
    let magnitude = value.abs();
    let (unit, factor) = UNITS
        .iter()
        .find(|(_, factor)| magnitude >= *factor)
        .copied()
        .unwrap_or(("b", 1f64));

    let scaled = format!("{:.2}", value / factor);
    let scaled = scaled.trim_end_matches('0').trim_end_matches('.');

    format!("{} {}", scaled, unit.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;

    #[test]
    fn test_upper_limit() {
        assert!(evaluate(90.0, Some(100.0), ThresholdLimit::Upper, true));
        assert!(evaluate(100.0, Some(100.0), ThresholdLimit::Upper, true));
        assert!(!evaluate(110.0, Some(100.0), ThresholdLimit::Upper, true));
    }

    #[test]
    fn test_lower_limit() {
        assert!(!evaluate(40.0, Some(50.0), ThresholdLimit::Lower, true));
        assert!(evaluate(50.0, Some(50.0), ThresholdLimit::Lower, true));
        assert!(evaluate(60.0, Some(50.0), ThresholdLimit::Lower, true));
    }

    #[test]
    fn test_not_enforced_always_passes() {
        for limit in [ThresholdLimit::Upper, ThresholdLimit::Lower] {
            assert!(evaluate(1e9, Some(0.0), limit, false));
            assert!(evaluate(-1e9, Some(0.0), limit, false));
        }
    }

    #[test]
    fn test_missing_threshold_passes() {
        assert!(evaluate(1e9, None, ThresholdLimit::Upper, true));
        assert!(evaluate(-1e9, None, ThresholdLimit::Lower, true));
    }

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage("40%"), Some(40.0));
        assert_eq!(parse_percentage(" 12.5 % "), Some(12.5));
        assert_eq!(parse_percentage("40"), None);
        assert_eq!(parse_numeric("40%"), Some(40.0));
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("150 KB"), Some(153_600.0));
        assert_eq!(parse_bytes("1mb"), Some(1_048_576.0));
        assert_eq!(parse_bytes("512 B"), Some(512.0));
        assert_eq!(parse_bytes("1.5KB"), Some(1536.0));
        assert_eq!(parse_bytes("lots"), None);
        assert_eq!(parse_numeric("2 KB"), Some(2048.0));
        assert_eq!(parse_numeric("1200"), Some(1200.0));
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.5 KB");
        assert_eq!(format_bytes(1_048_576.0), "1 MB");
        assert_eq!(format_bytes(-2048.0), "-2 KB");
        assert_eq!(format_bytes(0.0), "0 B");
    }

    #[test]
    fn test_percentage_threshold_on_item() {
        let item = ReportItem::leaf("app.css", "/app.css", "unused-source")
            .value("35.00%", "35.00%")
            .threshold("30%", "30%", ThresholdLimit::Lower)
            .evaluate(true);
        assert!(item.success);
        assert_eq!(item.raw_threshold, Some(Scalar::Text("30%".to_string())));

        let item = ReportItem::leaf("app.js", "/app.js", "unused-source")
            .value("20.00%", "20.00%")
            .threshold("30%", "30%", ThresholdLimit::Lower)
            .evaluate(true);
        assert!(!item.success);
    }

    #[test]
    fn test_item_without_raw_value_passes() {
        let item = ReportItem::leaf("label", "label", "size")
            .threshold("1 KB", 1024.0, ThresholdLimit::Upper)
            .evaluate(true);
        assert!(item.success);
    }
}
