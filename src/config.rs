//! Configuration for audit runs
//!
//! Provides:
//! - `AuditOptions`: per-run command options (routes, enabled producers, outputs)
//! - `LastValueConfig`: regression policy of the last-value plugin
//! - `ThresholdConfig`: the accepted threshold shapes, normalized once into
//!   [`Thresholds`] before any producer looks them up
//!
//! Loading these from files or CLI flags is left to the embedding binary.

use crate::error::{AuditError, Result};
use crate::output::OutputFormat;
use crate::types::ReportItem;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

fn default_route_invariant() -> Vec<String> {
    vec!["size".to_string()]
}

// ============================================================================
// Run options
// ============================================================================

/// Output file destinations, relative to `cwd` unless absolute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    #[serde(default)]
    pub html: Option<PathBuf>,
    #[serde(default)]
    pub json: Option<PathBuf>,
    #[serde(default)]
    pub markdown: Option<PathBuf>,
}

impl Outputs {
    /// Configured destination for a file format
    pub fn get(&self, format: OutputFormat) -> Option<&Path> {
        match format {
            OutputFormat::Html => self.html.as_deref(),
            OutputFormat::Json => self.json.as_deref(),
            OutputFormat::Markdown => self.markdown.as_deref(),
            OutputFormat::Cli => None,
        }
    }

    /// Configured file outputs in write order
    pub fn files(&self) -> Vec<(OutputFormat, &Path)> {
        OutputFormat::FILES
            .iter()
            .filter_map(|format| self.get(*format).map(|path| (*format, path)))
            .collect()
    }
}

/// Options of one audit command run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOptions {
    /// Working directory; output paths are resolved against it
    #[serde(default = "default_cwd")]
    pub cwd: PathBuf,

    /// Routes to audit; empty means a single run without a route
    #[serde(default)]
    pub routes: Vec<String>,

    /// Base URL the routes are appended to
    #[serde(default)]
    pub base_url: Option<String>,

    /// Judge values against thresholds
    #[serde(default = "default_true")]
    pub check_thresholds: bool,

    /// Enabled producer kinds; empty enables every registered producer
    #[serde(default)]
    pub modules: Vec<String>,

    /// Producer kinds measured once and reused for every route
    #[serde(default = "default_route_invariant")]
    pub route_invariant: Vec<String>,

    #[serde(default)]
    pub outputs: Outputs,

    /// Post a summary comment through the registered commenter
    #[serde(default)]
    pub comment: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            cwd: default_cwd(),
            routes: Vec::new(),
            base_url: None,
            check_thresholds: true,
            modules: Vec::new(),
            route_invariant: default_route_invariant(),
            outputs: Outputs::default(),
            comment: false,
        }
    }
}

impl AuditOptions {
    /// Whether the producer `kind` runs in this command
    pub fn is_enabled(&self, kind: &str) -> bool {
        self.modules.is_empty() || self.modules.iter().any(|m| m == kind)
    }

    /// Whether `kind` results are shared across routes
    pub fn is_route_invariant(&self, kind: &str) -> bool {
        self.route_invariant.iter().any(|k| k == kind)
    }

    /// Full URL of a route, if a base URL is configured
    pub fn url_for(&self, route: &str) -> Option<String> {
        self.base_url.as_ref().map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                route.trim_start_matches('/')
            )
        })
    }

    /// Resolve an output path against `cwd`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Check the options before a run
    ///
    /// Routes become sibling `rawLabel`s of the assembled report, so they
    /// must be non-empty and unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.trim().is_empty() {
                return Err(AuditError::Config("route must not be empty".to_string()));
            }
            if !seen.insert(route.as_str()) {
                return Err(AuditError::Config(format!("duplicate route '{}'", route)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Last-value policy
// ============================================================================

/// Value family used to pick breach limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Percentage,
    Size,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Percentage => "percentage",
            ValueKind::Size => "size",
        }
    }

    /// Classify an item by its formatted value
    pub fn of(item: &ReportItem) -> Self {
        match &item.value {
            Some(value) if value.is_percentage() => ValueKind::Percentage,
            _ if item.kind == "size" => ValueKind::Size,
            Some(crate::types::Scalar::Text(text))
                if crate::threshold::parse_bytes(text).is_some() =>
            {
                ValueKind::Size
            }
            _ => ValueKind::Number,
        }
    }

    /// Built-in breach limits
    pub fn default_breach(&self) -> BreachThreshold {
        match self {
            ValueKind::Number | ValueKind::Percentage => BreachThreshold {
                diff: 1.0,
                change: 2.0,
            },
            ValueKind::Size => BreachThreshold {
                diff: 1000.0,
                change: 2.0,
            },
        }
    }
}

/// How far a value may regress against the archive before it breaches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreachThreshold {
    /// Absolute regression limit, in the value's raw unit
    pub diff: f64,
    /// Relative regression limit, in percent
    pub change: f64,
}

/// Last-value plugin configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastValueConfig {
    /// Fail items that pass their threshold but regress beyond the breach limits
    #[serde(default)]
    pub fail_on_breach: bool,

    /// Archive only successful reports
    #[serde(default = "default_true")]
    pub save_only_on_success: bool,

    /// Breach limits keyed by item `type` or by value kind
    #[serde(default)]
    pub thresholds: HashMap<String, BreachThreshold>,
}

impl Default for LastValueConfig {
    fn default() -> Self {
        Self {
            fail_on_breach: false,
            save_only_on_success: true,
            thresholds: HashMap::new(),
        }
    }
}

impl LastValueConfig {
    /// Breach limits for an item: by `type`, then value kind, then built-in
    pub fn breach_threshold(&self, item: &ReportItem) -> BreachThreshold {
        let kind = ValueKind::of(item);
        self.thresholds
            .get(&item.kind)
            .or_else(|| self.thresholds.get(kind.as_str()))
            .copied()
            .unwrap_or_else(|| kind.default_breach())
    }
}

// ============================================================================
// Threshold shapes
// ============================================================================

/// Compression applied before measuring a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Brotli,
}

/// One path-scoped threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRule {
    /// Glob matched against the entry path
    pub path: String,
    /// Threshold text (`"150 KB"`, `"40%"`)
    pub max_size: String,
    /// Entry kind the rule is restricted to (e.g. "css", "js")
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Threshold as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    /// One threshold for every entry
    Single(String),
    /// Path-scoped rules, first match wins
    Rules(Vec<ThresholdRule>),
    /// Single threshold with measurement options
    #[serde(rename_all = "camelCase")]
    Detailed {
        max_size: String,
        #[serde(default)]
        compression: Option<Compression>,
    },
}

impl ThresholdConfig {
    /// Normalize into the canonical shape, compiling rule globs
    pub fn normalize(self) -> Result<Thresholds> {
        match self {
            ThresholdConfig::Single(threshold) => Ok(Thresholds {
                default: Some(threshold),
                ..Thresholds::default()
            }),
            ThresholdConfig::Detailed {
                max_size,
                compression,
            } => Ok(Thresholds {
                default: Some(max_size),
                rules: Vec::new(),
                compression,
            }),
            ThresholdConfig::Rules(rules) => {
                let rules = rules
                    .into_iter()
                    .map(CompiledRule::compile)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Thresholds {
                    default: None,
                    rules,
                    compression: None,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: GlobMatcher,
    kind: Option<String>,
    max_size: String,
}

impl CompiledRule {
    fn compile(rule: ThresholdRule) -> Result<Self> {
        let matcher = Glob::new(&rule.path)
            .map_err(|e| AuditError::Config(format!("invalid threshold path '{}': {}", rule.path, e)))?
            .compile_matcher();
        Ok(Self {
            matcher,
            kind: rule.kind,
            max_size: rule.max_size,
        })
    }

    fn matches(&self, path: &str, kind: Option<&str>) -> bool {
        self.kind.as_deref() == kind && self.matcher.is_match(path)
    }
}

/// Canonical thresholds handed to producers
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    default: Option<String>,
    rules: Vec<CompiledRule>,
    compression: Option<Compression>,
}

impl Thresholds {
    /// Threshold text for an entry
    ///
    /// A typed entry first looks for a rule of its own kind, then for an
    /// untyped rule. The single default applies when no rule list exists.
    pub fn lookup(&self, path: &str, kind: Option<&str>) -> Option<&str> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(path, kind))
            .or_else(|| match kind {
                Some(_) => self.rules.iter().find(|r| r.matches(path, None)),
                None => None,
            });

        rule.map(|r| r.max_size.as_str())
            .or(self.default.as_deref())
    }

    pub fn compression(&self) -> Option<Compression> {
        self.compression
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThresholdLimit;

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: AuditOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, AuditOptions::default());
        assert!(options.check_thresholds);
        assert!(options.is_route_invariant("size"));
        assert!(options.is_enabled("lighthouse"));
        assert!(!options.comment);
    }

    #[test]
    fn test_options_camel_case() {
        let options: AuditOptions = serde_json::from_str(
            r#"{
                "routes": ["/", "/about"],
                "baseUrl": "http://localhost:3000/",
                "checkThresholds": false,
                "modules": ["size"],
                "outputs": {"json": "reports/audit.json"}
            }"#,
        )
        .unwrap();
        assert!(!options.check_thresholds);
        assert!(options.is_enabled("size"));
        assert!(!options.is_enabled("lighthouse"));
        assert_eq!(
            options.url_for("/about").as_deref(),
            Some("http://localhost:3000/about")
        );
        assert_eq!(options.outputs.files().len(), 1);
        assert_eq!(
            options.resolve(Path::new("reports/audit.json")),
            PathBuf::from("./reports/audit.json")
        );
    }

    #[test]
    fn test_validate_routes() {
        let mut options = AuditOptions {
            routes: vec!["/".to_string(), "/about".to_string()],
            ..AuditOptions::default()
        };
        assert!(options.validate().is_ok());

        options.routes.push("/".to_string());
        assert!(matches!(options.validate(), Err(AuditError::Config(_))));

        options.routes = vec![" ".to_string()];
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_breach_threshold_lookup_order() {
        let config: LastValueConfig = serde_json::from_str(
            r#"{
                "failOnBreach": true,
                "thresholds": {
                    "lighthouse": {"diff": 5, "change": 10},
                    "size": {"diff": 2048, "change": 5}
                }
            }"#,
        )
        .unwrap();
        assert!(config.fail_on_breach);
        assert!(config.save_only_on_success);

        let score = ReportItem::leaf("Performance", "performance", "lighthouse")
            .value("92", 92.0)
            .build(true);
        assert_eq!(config.breach_threshold(&score).diff, 5.0);

        let file = ReportItem::leaf("main.js", "/main.js", "bundle")
            .value("1.5 KB", 1536.0)
            .build(true);
        assert_eq!(ValueKind::of(&file), ValueKind::Size);
        assert_eq!(config.breach_threshold(&file).diff, 2048.0);

        let unused = ReportItem::leaf("app.css", "/app.css", "unused-source")
            .value("35.00%", "35.00%")
            .threshold("30%", "30%", ThresholdLimit::Lower)
            .build(true);
        assert_eq!(ValueKind::of(&unused), ValueKind::Percentage);
        assert_eq!(
            config.breach_threshold(&unused),
            BreachThreshold {
                diff: 1.0,
                change: 2.0
            }
        );
    }

    #[test]
    fn test_threshold_single_and_detailed() {
        let single: ThresholdConfig = serde_json::from_str(r#""40%""#).unwrap();
        let thresholds = single.normalize().unwrap();
        assert_eq!(thresholds.lookup("/any.js", Some("js")), Some("40%"));

        let detailed: ThresholdConfig =
            serde_json::from_str(r#"{"maxSize": "150 KB", "compression": "gzip"}"#).unwrap();
        let thresholds = detailed.normalize().unwrap();
        assert_eq!(thresholds.lookup("/main.js", None), Some("150 KB"));
        assert_eq!(thresholds.compression(), Some(Compression::Gzip));
    }

    #[test]
    fn test_threshold_rules_typed_then_untyped() {
        let config: ThresholdConfig = serde_json::from_str(
            r#"[
                {"path": "**/*.css", "maxSize": "30%", "type": "css"},
                {"path": "/vendor/**", "maxSize": "10%"},
                {"path": "**", "maxSize": "50%", "type": "js"}
            ]"#,
        )
        .unwrap();
        let thresholds = config.normalize().unwrap();

        assert_eq!(thresholds.lookup("/static/app.css", Some("css")), Some("30%"));
        assert_eq!(thresholds.lookup("/vendor/lib.css", Some("css")), Some("30%"));
        assert_eq!(thresholds.lookup("/vendor/lib.js", Some("js")), Some("50%"));
        assert_eq!(thresholds.lookup("/vendor/page", None), Some("10%"));
        assert_eq!(thresholds.lookup("/static/app.css", None), None);
        assert!(thresholds.compression().is_none());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let config = ThresholdConfig::Rules(vec![ThresholdRule {
            path: "[".to_string(),
            max_size: "1 KB".to_string(),
            kind: None,
        }]);
        assert!(matches!(config.normalize(), Err(AuditError::Config(_))));
    }
}
