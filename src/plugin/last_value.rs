//! Last-value diff engine
//!
//! Compares the report of a run with the archived report of the same
//! command. Built entirely from hooks:
//!
//! - `command/*/action/end`: fetch the archive through
//!   `plugin/last-value/report/get` and annotate matching leaves with
//!   `lastValue*` fields, failing regressions when `failOnBreach` is set
//! - `command/*/run/end`: archive the final report through
//!   `plugin/last-value/report/save`
//! - `output/cli/report/end`: add a "Last Value" column after "Value"
//!
//! A missing, unreadable or unparseable archive only skips diffing.

use crate::bus::{EventBus, HandlerId, HookHandler, HookReturn};
use crate::config::{LastValueConfig, ValueKind};
use crate::error::Result;
use crate::events::{GetEvent, HookPayload, SaveEvent, LAST_VALUE_GET, LAST_VALUE_SAVE};
use crate::output::{Align, Column, ColumnKind};
use crate::threshold::format_bytes;
use crate::types::{Report, ReportItem, ThresholdLimit};
use async_trait::async_trait;
use std::sync::Arc;

/// Header of the inserted CLI column
pub const LAST_VALUE_HEADER: &str = "Last Value";

/// Outcome of applying an archive to a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Leaves that found an archived counterpart
    pub matched: usize,
    /// Leaves flipped to failure by a regression
    pub breaches: usize,
}

/// `(rawValue - rawLastValue, relative change in percent)`
///
/// The change is `None` when the archived value is zero.
pub fn compute_diff(current: f64, last: f64) -> (f64, Option<f64>) {
    let diff = current - last;
    let change = if last == 0.0 {
        None
    } else {
        Some(diff * 100.0 / last)
    };
    (diff, change)
}

/// Whether an annotated leaf regressed beyond its breach limits
///
/// For `lower` thresholds a decrease is the regression; otherwise an
/// increase is.
pub fn breach(item: &ReportItem, config: &LastValueConfig) -> bool {
    let Some(diff) = item.last_value_diff else {
        return false;
    };
    let direction = match item.threshold_limit {
        Some(ThresholdLimit::Lower) => -1.0,
        _ => 1.0,
    };

    let regression = diff * direction;
    if regression <= 0.0 {
        return false;
    }

    let limits = config.breach_threshold(item);
    let change = item.last_value_change.map(|c| c * direction);
    regression > limits.diff || change.is_some_and(|c| c > limits.change)
}

/// Annotate `report` with values from `archived`
///
/// Items are joined level by level on `rawLabel` and `type`; archived items
/// without a counterpart are ignored. Breaches only fail items that
/// currently succeed, and trigger a full re-aggregation.
pub fn apply_archive(
    report: &mut Report,
    archived: &Report,
    config: &LastValueConfig,
) -> DiffSummary {
    let mut summary = DiffSummary::default();

    if let Some(items) = report.data.as_mut() {
        join_level(items, archived.items(), config, &mut summary);
    }

    if summary.breaches > 0 {
        report.reaggregate();
    }
    summary
}

fn join_level(
    items: &mut [ReportItem],
    archived: &[ReportItem],
    config: &LastValueConfig,
    summary: &mut DiffSummary,
) {
    let current: Vec<(String, String)> = items
        .iter()
        .map(|i| (i.raw_label.clone(), i.kind.clone()))
        .collect();

    for item in items.iter_mut() {
        let same = |i: &ReportItem| i.raw_label == item.raw_label && i.kind == item.kind;
        let mut candidates = archived.iter().filter(|a| same(a));
        let Some(last) = candidates.next() else {
            continue;
        };
        // an ambiguous label has no match on either side
        let repeated = current
            .iter()
            .filter(|(label, kind)| *label == item.raw_label && *kind == item.kind)
            .count()
            > 1;
        if candidates.next().is_some() || repeated {
            tracing::debug!(item = %item.raw_label, "Duplicate rawLabel; not compared");
            continue;
        }

        match (item.data.as_mut(), last.data.as_deref()) {
            (Some(children), Some(last_children)) => {
                join_level(children, last_children, config, summary)
            }
            (None, None) => apply_leaf(item, last, config, summary),
            // a leaf became a group or the other way round
            _ => {}
        }
    }
}

fn apply_leaf(
    item: &mut ReportItem,
    last: &ReportItem,
    config: &LastValueConfig,
    summary: &mut DiffSummary,
) {
    summary.matched += 1;
    item.last_value = last.value.clone();
    item.raw_last_value = last.raw_value.clone();

    let current = item.raw_value.as_ref().and_then(|v| v.as_f64());
    let previous = last.raw_value.as_ref().and_then(|v| v.as_f64());
    if let (Some(current), Some(previous)) = (current, previous) {
        let (diff, change) = compute_diff(current, previous);
        item.last_value_diff = Some(diff);
        item.last_value_change = change;
    }

    if config.fail_on_breach && item.success && breach(item, config) {
        tracing::debug!(
            item = %item.raw_label,
            diff = ?item.last_value_diff,
            change = ?item.last_value_change,
            "Regression breach"
        );
        item.success = false;
        summary.breaches += 1;
    }
}

fn decimalize(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Cell text of the "Last Value" column
pub fn render_last_value(item: &ReportItem) -> String {
    let Some(last) = &item.last_value else {
        return String::new();
    };
    let sign = |v: f64| if v > 0.0 { "+" } else { "" };

    match (item.last_value_diff, item.last_value_change) {
        (Some(diff), _) if diff != 0.0 && ValueKind::of(item) == ValueKind::Size => {
            format!("{} ({}{})", last, sign(diff), format_bytes(diff))
        }
        (Some(diff), Some(change)) if diff != 0.0 => {
            format!("{} ({}{}%)", last, sign(diff), decimalize(change))
        }
        (Some(diff), None) if diff != 0.0 => {
            format!("{} ({}{})", last, sign(diff), decimalize(diff))
        }
        _ => last.to_string(),
    }
}

/// Fetch the archived report of `command` through the get hook
///
/// Handlers return `{ "report": <string | object> }`; the first return that
/// carries a non-empty report wins. Every failure is logged and treated as
/// "no archive".
pub async fn get_last_report(bus: &EventBus, command: &str) -> Option<Report> {
    let mut payload = HookPayload::Get(GetEvent {
        command: command.to_string(),
    });

    let outcome = match bus.fire(LAST_VALUE_GET, &mut payload).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(command = %command, error = %e, "Archive lookup failed");
            return None;
        }
    };

    let Some(stored) = outcome.rets.iter().flatten().find_map(stored_report) else {
        tracing::debug!(command = %command, "No archived report");
        return None;
    };

    let parsed = match stored {
        serde_json::Value::String(json) => serde_json::from_str::<Report>(json),
        other => serde_json::from_value::<Report>(other.clone()),
    };

    match parsed {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(command = %command, error = %e, "Archived report is unreadable; skipping diff");
            None
        }
    }
}

/// Report payload of one get-hook return, skipping empty rows
fn stored_report(row: &serde_json::Value) -> Option<&serde_json::Value> {
    let stored = match row {
        serde_json::Value::Object(fields) if fields.contains_key("report") => &fields["report"],
        other => other,
    };
    match stored {
        serde_json::Value::String(json) if !json.trim().is_empty() => Some(stored),
        serde_json::Value::Object(fields) if !fields.is_empty() => Some(stored),
        _ => None,
    }
}

/// Request archiving of `report`; returns whether the save hook fired
pub async fn save_report(
    bus: &EventBus,
    command: &str,
    report: &Report,
    config: &LastValueConfig,
) -> bool {
    if config.save_only_on_success && !report.success {
        tracing::debug!(command = %command, "Report failed; not archiving");
        return false;
    }

    let mut payload = HookPayload::Save(SaveEvent {
        command: command.to_string(),
        report: report.clone(),
    });
    if let Err(e) = bus.fire(LAST_VALUE_SAVE, &mut payload).await {
        tracing::warn!(command = %command, error = %e, "Archive save failed");
    }
    true
}

/// Command segment of a `command/<cmd>/...` hook name
fn command_of(event: &str) -> Option<&str> {
    event.split('/').nth(1)
}

struct DiffHandler {
    config: Arc<LastValueConfig>,
}

#[async_trait]
impl HookHandler for DiffHandler {
    async fn handle(
        &self,
        bus: &EventBus,
        event: &str,
        payload: &mut HookPayload,
    ) -> Result<HookReturn> {
        let Some(command) = command_of(event) else {
            return Ok(None);
        };
        if payload.report().is_none() {
            return Ok(None);
        }

        let Some(archived) = get_last_report(bus, command).await else {
            return Ok(None);
        };

        if let Some(report) = payload.report_mut() {
            let summary = apply_archive(report, &archived, &self.config);
            tracing::info!(
                command = %command,
                matched = summary.matched,
                breaches = summary.breaches,
                "Compared against archived report"
            );
        }
        Ok(None)
    }
}

struct SaveHandler {
    config: Arc<LastValueConfig>,
}

#[async_trait]
impl HookHandler for SaveHandler {
    async fn handle(
        &self,
        bus: &EventBus,
        event: &str,
        payload: &mut HookPayload,
    ) -> Result<HookReturn> {
        let Some(command) = command_of(event) else {
            return Ok(None);
        };
        if let Some(report) = payload.report_mut() {
            // earlier handlers of this hook may have flipped leaves
            report.reaggregate();
            save_report(bus, command, report, &self.config).await;
        }
        Ok(None)
    }
}

/// Registers the diff, archive and CLI column handlers
#[derive(Debug, Clone, Default)]
pub struct LastValuePlugin {
    config: Arc<LastValueConfig>,
}

impl LastValuePlugin {
    pub fn new(config: LastValueConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LastValueConfig {
        &self.config
    }

    /// Subscribe the plugin on `bus`
    pub fn register(&self, bus: &EventBus) -> Result<Vec<HandlerId>> {
        let diff = bus.on(
            "command/*/action/end",
            Arc::new(DiffHandler {
                config: self.config.clone(),
            }),
            None,
        )?;
        let save = bus.on(
            "command/*/run/end",
            Arc::new(SaveHandler {
                config: self.config.clone(),
            }),
            None,
        )?;
        let column = bus.on_fn("output/cli/report/end", None, |_, payload| {
            if let Some(table) = payload.table_mut() {
                if table.find_column(LAST_VALUE_HEADER).is_none() {
                    let index = table.find_column("Value").map(|i| i + 1);
                    table.add_column(
                        Column::new(LAST_VALUE_HEADER, ColumnKind::LastValue, Align::Center),
                        index,
                    );
                }
            }
            Ok(None)
        })?;

        tracing::debug!(
            fail_on_breach = self.config.fail_on_breach,
            save_only_on_success = self.config.save_only_on_success,
            "Last-value plugin registered"
        );
        Ok(vec![diff, save, column])
    }
}
