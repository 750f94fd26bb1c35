//! Report model shared by every pipeline stage
//!
//! A `Report` is a tree of `ReportItem`s. Leaves carry measurements; groups
//! (items with `data`) carry a cached AND of their children's success that
//! is recomputed explicitly through [`Report::reaggregate`] whenever a later
//! stage flips a leaf. All types use camelCase JSON serialization so an
//! archived report can be read back by any consumer.

use crate::threshold;
use serde::{Deserialize, Serialize};

/// A measured or configured value: either a number or formatted text
///
/// Text values such as `"150 KB"` or `"40%"` still have a numeric reading
/// through [`Scalar::as_f64`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Numeric reading of this value, if any
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(text) => threshold::parse_numeric(text),
        }
    }

    /// Whether this is a `"NN%"` string
    pub fn is_percentage(&self) -> bool {
        matches!(self, Scalar::Text(text) if text.trim_end().ends_with('%'))
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

/// Comparison direction of a threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLimit {
    /// Value must not exceed the threshold (byte-size ceilings)
    #[default]
    Upper,
    /// Value must not fall below the threshold (score and percentage floors)
    Lower,
}

/// Error captured from a producer that could not complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    pub message: String,
    /// `source()` chain, one cause per line
    #[serde(default, deserialize_with = "stack_text")]
    pub stack: String,
}

impl ReportError {
    /// Capture an error and its `source()` chain
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            stack: causes.join("\n"),
        }
    }
}

/// Accepts a stack as one string or as a list of frames
fn stack_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stack {
        Text(String),
        Frames(Vec<String>),
        Missing(()),
    }

    Ok(match Stack::deserialize(deserializer)? {
        Stack::Text(text) => text,
        Stack::Frames(frames) => frames.join("\n"),
        Stack::Missing(()) => String::new(),
    })
}

/// A node of the report tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    /// Display label
    pub label: String,

    /// Stable identity key; unique among siblings, used to join against archives
    pub raw_label: String,

    /// Producer kind tag (e.g., "size", "lighthouse", "unused-source")
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_threshold: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_limit: Option<ThresholdLimit>,

    /// Archived display value, set by the last-value plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<Scalar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_last_value: Option<Scalar>,

    /// `rawValue - rawLastValue`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value_diff: Option<f64>,

    /// Relative change against the archive in percent; unset when the archived value is zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value_change: Option<f64>,

    pub success: bool,

    /// Child items; present only on groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ReportItem>>,

    /// Set on a producer slot whose producer failed; such a slot has no `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,

    /// Opaque producer output for renderers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl ReportItem {
    fn blank(label: String, raw_label: String, kind: String, success: bool) -> Self {
        Self {
            label,
            raw_label,
            kind,
            value: None,
            raw_value: None,
            threshold: None,
            raw_threshold: None,
            threshold_limit: None,
            last_value: None,
            raw_last_value: None,
            last_value_diff: None,
            last_value_change: None,
            success,
            data: None,
            error: None,
            raw: None,
        }
    }

    /// Start building a leaf; it becomes a `ReportItem` once evaluated
    pub fn leaf(
        label: impl Into<String>,
        raw_label: impl Into<String>,
        kind: impl Into<String>,
    ) -> LeafBuilder {
        LeafBuilder {
            item: Self::blank(label.into(), raw_label.into(), kind.into(), true),
        }
    }

    /// Create a group whose success is the AND of every descendant leaf
    pub fn group(
        label: impl Into<String>,
        raw_label: impl Into<String>,
        kind: impl Into<String>,
        children: Vec<ReportItem>,
    ) -> Self {
        let mut item = Self::blank(label.into(), raw_label.into(), kind.into(), true);
        item.data = Some(children);
        item.reaggregate();
        item
    }

    /// Create the slot of a producer that failed fatally
    pub fn failed_slot(kind: impl Into<String>, error: ReportError) -> Self {
        let kind = kind.into();
        let mut item = Self::blank(kind.clone(), kind.clone(), kind, false);
        item.error = Some(error);
        item
    }

    /// Whether this item has children
    pub fn is_group(&self) -> bool {
        self.data.is_some()
    }

    /// Children, empty for leaves
    pub fn children(&self) -> &[ReportItem] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Direct child by `rawLabel`
    pub fn child(&self, raw_label: &str) -> Option<&ReportItem> {
        self.children().iter().find(|c| c.raw_label == raw_label)
    }

    /// Recompute cached group success from the leaves up, returning this item's success
    pub fn reaggregate(&mut self) -> bool {
        if let Some(children) = self.data.as_mut() {
            let mut success = true;
            for child in children.iter_mut() {
                // every child must be visited, so no short-circuit
                success &= child.reaggregate();
            }
            self.success = success && self.error.is_none();
        }
        self.success
    }

    /// Number of failing direct children
    pub fn failure_count(&self) -> usize {
        self.children().iter().filter(|c| !c.success).count()
    }

    /// All leaves below (or equal to) this item, depth-first
    pub fn leaves(&self) -> Vec<&ReportItem> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }
}

fn collect_leaves<'a>(item: &'a ReportItem, out: &mut Vec<&'a ReportItem>) {
    match item.data.as_deref() {
        Some(children) => children.iter().for_each(|c| collect_leaves(c, out)),
        None => out.push(item),
    }
}

/// Builder for leaf items
///
/// Only [`LeafBuilder::evaluate`] and [`LeafBuilder::build`] produce a
/// `ReportItem`, so a leaf never exists without a computed `success`.
#[derive(Debug, Clone)]
pub struct LeafBuilder {
    item: ReportItem,
}

impl LeafBuilder {
    /// Set the formatted and raw measurement
    pub fn value(mut self, value: impl Into<Scalar>, raw_value: impl Into<Scalar>) -> Self {
        self.item.value = Some(value.into());
        self.item.raw_value = Some(raw_value.into());
        self
    }

    /// Set the formatted and raw threshold with its comparison direction
    pub fn threshold(
        mut self,
        threshold: impl Into<Scalar>,
        raw_threshold: impl Into<Scalar>,
        limit: ThresholdLimit,
    ) -> Self {
        self.item.threshold = Some(threshold.into());
        self.item.raw_threshold = Some(raw_threshold.into());
        self.item.threshold_limit = Some(limit);
        self
    }

    /// Attach opaque producer output
    pub fn raw(mut self, raw: serde_json::Value) -> Self {
        self.item.raw = Some(raw);
        self
    }

    /// Finish the leaf, judging it against its threshold
    pub fn evaluate(mut self, enforce: bool) -> ReportItem {
        self.item.success = threshold::evaluate_item(&self.item, enforce);
        self.item
    }

    /// Finish the leaf with a success decided by the producer
    pub fn build(mut self, success: bool) -> ReportItem {
        self.item.success = success;
        self.item
    }
}

/// Root envelope of an audit run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// AND of every top-level item's success
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<ReportItem>>,

    /// Set only when a producer fatally failed; `data` is absent then
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,

    /// Opaque producer output, passed through to renderers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_reports: Vec<Report>,
}

impl Report {
    /// Create a report from top-level items, aggregating success
    pub fn new(items: Vec<ReportItem>) -> Self {
        let mut report = Self {
            success: true,
            data: Some(items),
            error: None,
            raw: None,
            raw_reports: Vec::new(),
        };
        report.reaggregate();
        report
    }

    /// Create the report of a producer that failed fatally
    pub fn failed(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ReportError::from_error(err)),
            raw: None,
            raw_reports: Vec::new(),
        }
    }

    /// Attach opaque producer output
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Top-level items, empty when absent
    pub fn items(&self) -> &[ReportItem] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Top-level item by `rawLabel`
    pub fn item(&self, raw_label: &str) -> Option<&ReportItem> {
        self.items().iter().find(|i| i.raw_label == raw_label)
    }

    /// Re-run aggregation from every leaf up to the root
    pub fn reaggregate(&mut self) -> bool {
        let mut success = self.error.is_none();
        if let Some(items) = self.data.as_mut() {
            for item in items.iter_mut() {
                success &= item.reaggregate();
            }
        }
        self.success = success;
        success
    }

    /// Process exit code reflecting `success`
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_leaf(name: &str, bytes: f64, max: f64) -> ReportItem {
        ReportItem::leaf(name, format!("/build/{}", name), "size")
            .value(threshold::format_bytes(bytes), bytes)
            .threshold(threshold::format_bytes(max), max, ThresholdLimit::Upper)
            .evaluate(true)
    }

    fn sample_report() -> Report {
        Report::new(vec![
            ReportItem::group(
                "Size Checks",
                "size",
                "size",
                vec![
                    size_leaf("main.js", 900.0, 1000.0),
                    size_leaf("vendor.js", 1100.0, 1000.0),
                ],
            ),
            ReportItem::group(
                "Lighthouse",
                "lighthouse",
                "lighthouse",
                vec![ReportItem::leaf("Performance", "performance", "lighthouse")
                    .value("92", 92.0)
                    .threshold("90", 90.0, ThresholdLimit::Lower)
                    .evaluate(true)],
            ),
        ])
    }

    #[test]
    fn test_leaf_evaluated_at_construction() {
        assert!(size_leaf("a.js", 900.0, 1000.0).success);
        assert!(!size_leaf("b.js", 1100.0, 1000.0).success);

        let unchecked = ReportItem::leaf("c.js", "/c.js", "size")
            .value("2 KB", 2048.0)
            .threshold("1 KB", 1024.0, ThresholdLimit::Upper)
            .evaluate(false);
        assert!(unchecked.success);
    }

    #[test]
    fn test_group_and_root_aggregation() {
        let report = sample_report();
        assert!(!report.success);
        assert!(!report.item("size").unwrap().success);
        assert!(report.item("lighthouse").unwrap().success);
        assert_eq!(report.item("size").unwrap().failure_count(), 1);
    }

    #[test]
    fn test_nested_group_aggregation() {
        let inner = ReportItem::group("inner", "inner", "size", vec![size_leaf("x.js", 2.0, 1.0)]);
        let outer = ReportItem::group("outer", "outer", "size", vec![inner, size_leaf("y.js", 1.0, 2.0)]);
        assert!(!outer.success);
        assert_eq!(outer.leaves().len(), 2);
    }

    #[test]
    fn test_reaggregate_after_leaf_flip() {
        let mut report = Report::new(vec![ReportItem::group(
            "Size Checks",
            "size",
            "size",
            vec![size_leaf("main.js", 900.0, 1000.0)],
        )]);
        assert!(report.success);

        report.data.as_mut().unwrap()[0].data.as_mut().unwrap()[0].success = false;
        // cached aggregates are stale until the explicit pass
        assert!(report.success);

        assert!(!report.reaggregate());
        assert!(!report.item("size").unwrap().success);

        report.data.as_mut().unwrap()[0].data.as_mut().unwrap()[0].success = true;
        assert!(report.reaggregate());
    }

    #[test]
    fn test_empty_group_succeeds() {
        let group = ReportItem::group("empty", "empty", "size", vec![]);
        assert!(group.success);
        assert!(Report::new(vec![]).success);
    }

    #[test]
    fn test_failed_report_and_slot() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "cannot open page");
        let report = Report::failed(&err);
        assert!(!report.success);
        assert!(report.data.is_none());
        assert_eq!(report.error.as_ref().unwrap().message, "cannot open page");
        assert_eq!(report.exit_code(), 1);

        let slot = ReportItem::failed_slot("heap-snapshot", report.error.clone().unwrap());
        assert!(!slot.success);
        assert!(slot.data.is_none());
        assert_eq!(slot.raw_label, "heap-snapshot");
    }

    #[derive(Debug)]
    struct PageError(std::io::Error);

    impl std::fmt::Display for PageError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("could not open page")
        }
    }

    impl std::error::Error for PageError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_error_chain_captured() {
        let err = PageError(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "browser not reachable",
        ));
        let captured = ReportError::from_error(&err);
        assert_eq!(captured.message, "could not open page");
        assert_eq!(captured.stack, "browser not reachable");
    }

    #[test]
    fn test_error_stack_accepts_text_and_frames() {
        let text: ReportError = serde_json::from_value(serde_json::json!({
            "message": "boom",
            "stack": "Error: boom\n    at audit (index.js:1:1)"
        }))
        .unwrap();
        assert_eq!(text.stack, "Error: boom\n    at audit (index.js:1:1)");

        let frames: ReportError = serde_json::from_value(serde_json::json!({
            "message": "boom",
            "stack": ["first", "second"]
        }))
        .unwrap();
        assert_eq!(frames.stack, "first\nsecond");

        let null: ReportError =
            serde_json::from_value(serde_json::json!({"message": "boom", "stack": null})).unwrap();
        assert!(null.stack.is_empty());

        let missing: ReportError =
            serde_json::from_value(serde_json::json!({"message": "boom"})).unwrap();
        assert!(missing.stack.is_empty());
    }

    #[test]
    fn test_json_roundtrip_is_structural() {
        let report = sample_report().with_raw(serde_json::json!({"files": 2}));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"rawLabel\":\"size\""));
        assert!(json.contains("\"thresholdLimit\":\"upper\""));
        assert!(json.contains("\"type\":\"lighthouse\""));
        assert!(!json.contains("lastValue"));

        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_deserialize_integer_and_text_values() {
        let json = r#"{
            "success": true,
            "data": [{
                "label": "main.js",
                "rawLabel": "/main.js",
                "type": "size",
                "value": "1.5 KB",
                "rawValue": 1200,
                "success": true
            }]
        }"#;
        let report: Report = serde_json::from_str(json).unwrap();
        let item = &report.items()[0];
        assert_eq!(item.raw_value, Some(Scalar::Number(1200.0)));
        assert_eq!(item.value.as_ref().unwrap().as_f64(), Some(1536.0));
        assert!(report.raw_reports.is_empty());
    }

    #[test]
    fn test_scalar_readings() {
        assert_eq!(Scalar::from("40%").as_f64(), Some(40.0));
        assert!(Scalar::from("40%").is_percentage());
        assert!(!Scalar::from(40.0).is_percentage());
        assert_eq!(Scalar::from("n/a").as_f64(), None);
        assert_eq!(Scalar::from(3.5).to_string(), "3.5");
    }
}
