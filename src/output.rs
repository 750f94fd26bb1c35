//! Output formats, the CLI column table and renderer seams
//!
//! Renderers only read a finished report. The CLI `Table` is the one piece of
//! output state plugins may change: handlers of `output/cli/report/end`
//! receive it mutably and can insert columns relative to existing ones.

use crate::config::AuditOptions;
use crate::error::Result;
use crate::plugin::last_value::render_last_value;
use crate::types::{Report, ReportItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a report is rendered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Cli,
    Html,
    Json,
    Markdown,
}

impl OutputFormat {
    /// File formats in the order they are written
    pub const FILES: [OutputFormat; 3] = [
        OutputFormat::Html,
        OutputFormat::Json,
        OutputFormat::Markdown,
    ];

    /// Hook segment of this format
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Cli => "cli",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
        }
    }

    /// Human name for log lines
    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Cli => "CLI",
            OutputFormat::Html => "HTML",
            OutputFormat::Json => "JSON",
            OutputFormat::Markdown => "Markdown",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Column table
// ============================================================================

/// What a column shows for each item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Label,
    Value,
    Threshold,
    Success,
    LastValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub header: String,
    pub kind: ColumnKind,
    pub align: Align,
}

impl Column {
    pub fn new(header: impl Into<String>, kind: ColumnKind, align: Align) -> Self {
        Self {
            header: header.into(),
            kind,
            align,
        }
    }
}

/// Ordered set of columns rendering a report as rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Default columns: Label and Value, plus Threshold and Success when judging
    pub fn for_options(check_thresholds: bool) -> Self {
        let mut table = Self::new(vec![
            Column::new("Label", ColumnKind::Label, Align::Left),
            Column::new("Value", ColumnKind::Value, Align::Center),
        ]);

        if check_thresholds {
            table.add_column(Column::new("Threshold", ColumnKind::Threshold, Align::Center), None);
            table.add_column(Column::new("Success", ColumnKind::Success, Align::Center), None);
        }

        table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.header.as_str()).collect()
    }

    /// Index of the column with `header`
    pub fn find_column(&self, header: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.header == header)
    }

    /// Insert a column at `index` (clamped), or append it
    pub fn add_column(&mut self, column: Column, index: Option<usize>) {
        let index = index
            .unwrap_or(self.columns.len())
            .min(self.columns.len());
        self.columns.insert(index, column);
    }

    /// Cell text of one column for one item
    pub fn cell(&self, column: &Column, item: &ReportItem, depth: usize) -> String {
        match column.kind {
            ColumnKind::Label => {
                let indent = "  ".repeat(depth);
                if item.is_group() {
                    let mark = if item.success { "✓" } else { "x" };
                    format!("{}{} [ success: {} ]", indent, item.label, mark)
                } else {
                    format!("{}{}", indent, item.label)
                }
            }
            ColumnKind::Value => match (&item.value, &item.error) {
                (Some(value), _) => value.to_string(),
                (None, Some(error)) => error.message.clone(),
                (None, None) => String::new(),
            },
            ColumnKind::Threshold => item
                .threshold
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            ColumnKind::Success => (if item.success { "✓" } else { "x" }).to_string(),
            ColumnKind::LastValue => render_last_value(item),
        }
    }

    /// One row per item, depth-first, children indented under their group
    pub fn rows(&self, report: &Report) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for item in report.items() {
            self.push_rows(item, 0, &mut rows);
        }
        rows
    }

    fn push_rows(&self, item: &ReportItem, depth: usize, rows: &mut Vec<Vec<String>>) {
        rows.push(
            self.columns
                .iter()
                .map(|column| self.cell(column, item, depth))
                .collect(),
        );
        for child in item.children() {
            self.push_rows(child, depth + 1, rows);
        }
    }

    /// Plain-text rendering for the terminal
    pub fn render(&self, report: &Report) -> String {
        let rows = self.rows(report);
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                rows.iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(column.header.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let format_line = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(self.columns.iter().zip(&widths))
                .map(|(cell, (column, width))| pad(cell, *width, column.align))
                .collect::<Vec<_>>()
                .join(" │ ")
                .trim_end()
                .to_string()
        };

        let mut lines = Vec::with_capacity(rows.len() + 2);
        lines.push(format_line(self.headers()));
        lines.push(
            widths
                .iter()
                .map(|w| "─".repeat(*w))
                .collect::<Vec<_>>()
                .join("─┼─"),
        );
        for row in &rows {
            lines.push(format_line(row.iter().map(String::as_str).collect()));
        }
        lines.join("\n")
    }
}

fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = width.saturating_sub(text.chars().count());
    match align {
        Align::Left => format!("{}{}", text, " ".repeat(fill)),
        Align::Right => format!("{}{}", " ".repeat(fill), text),
        Align::Center => {
            let left = fill / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(fill - left))
        }
    }
}

// ============================================================================
// Renderers
// ============================================================================

/// Turns a finished report into file contents
///
/// Renderers read the report and never mutate it.
pub trait Renderer: Send + Sync {
    fn render(&self, report: &Report, options: &AuditOptions) -> Result<String>;
}

/// Pretty-printed camelCase JSON of the whole report
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, report: &Report, _options: &AuditOptions) -> Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

/// GitHub-flavoured Markdown table using the default columns
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, report: &Report, options: &AuditOptions) -> Result<String> {
        let table = Table::for_options(options.check_thresholds);
        let escape = |cell: &str| cell.trim().replace('|', "\\|");

        let mut lines = vec![
            format!("| {} |", table.headers().join(" | ")),
            format!(
                "|{}",
                table
                    .columns()
                    .iter()
                    .map(|c| match c.align {
                        Align::Left => " :--- |",
                        Align::Center => " :---: |",
                        Align::Right => " ---: |",
                    })
                    .collect::<String>()
            ),
        ];
        for row in table.rows(report) {
            let cells: Vec<String> = row.iter().map(|c| escape(c)).collect();
            lines.push(format!("| {} |", cells.join(" | ")));
        }
        Ok(lines.join("\n"))
    }
}

/// Posts a comment to the version-control system of the current change
#[async_trait]
pub trait Commenter: Send + Sync {
    async fn comment(&self, body: &str) -> Result<()>;
}

/// Comment body: one collapsible section per top-level group
pub fn render_comment(
    report: &Report,
    markdown: &dyn Renderer,
    options: &AuditOptions,
) -> Result<String> {
    let mut sections = Vec::new();
    for item in report.items().iter().filter(|i| i.is_group()) {
        let failures = item.failure_count();
        let table = markdown.render(&Report::new(item.children().to_vec()), options)?;
        sections.push(format!(
            "<details><summary>{} ({} failure{})</summary>\n<p>\n\n{}\n\n</p>\n</details>",
            item.label,
            failures,
            if failures == 1 { "" } else { "s" },
            table
        ));
    }
    Ok(sections.join("\n\n").trim().to_string())
}
