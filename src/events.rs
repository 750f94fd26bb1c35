//! Hook names and payloads
//!
//! Hook names follow `<subsystem>/<resource>/<verb>/<phase>`. Every mutating
//! pipeline stage fires a `start` hook before the stage and an `end` hook
//! after it, both carrying the same payload shape.
//!
//! Handlers receive `&mut HookPayload` and must mutate it in place. Swapping
//! the payload for a different variant is reported by the pipeline as a hook
//! failure.

use crate::config::AuditOptions;
use crate::output::{OutputFormat, Table};
use crate::pipeline::AuditContext;
use crate::types::Report;
use std::path::PathBuf;

/// Fired by the last-value plugin to fetch an archived report
pub const LAST_VALUE_GET: &str = "plugin/last-value/report/get";

/// Fired by the last-value plugin to request archiving of a report
pub const LAST_VALUE_SAVE: &str = "plugin/last-value/report/save";

/// Stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::End => "end",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a hook name from its four segments
pub fn hook_name(subsystem: &str, resource: &str, verb: &str, phase: &str) -> String {
    format!("{}/{}/{}/{}", subsystem, resource, verb, phase)
}

/// `command/<cmd>/run/<phase>`: around the whole run
pub fn command_run(command: &str, phase: Phase) -> String {
    hook_name("command", command, "run", phase.as_str())
}

/// `command/<cmd>/action/<phase>`: around report production
pub fn command_action(command: &str, phase: Phase) -> String {
    hook_name("command", command, "action", phase.as_str())
}

/// `module/<kind>/audit/<phase>`: around a producer invocation
pub fn module_audit(kind: &str, phase: Phase) -> String {
    hook_name("module", kind, "audit", phase.as_str())
}

/// `module/<kind>/report/<phase>`: around evaluation of a producer's report
pub fn module_report(kind: &str, phase: Phase) -> String {
    hook_name("module", kind, "report", phase.as_str())
}

/// `output/cli/report/<phase>`
pub fn cli_report(phase: Phase) -> String {
    hook_name("output", "cli", "report", phase.as_str())
}

/// `output/cli/write/<phase>`
pub fn cli_write(phase: Phase) -> String {
    hook_name("output", "cli", "write", phase.as_str())
}

/// `output/<format>/report/<phase>`
pub fn output_report(format: OutputFormat, phase: Phase) -> String {
    hook_name("output", format.as_str(), "report", phase.as_str())
}

/// `output/file/write/<phase>`
pub fn file_write(phase: Phase) -> String {
    hook_name("output", "file", "write", phase.as_str())
}

/// `vcs/comment/<phase>`: the comment stage has no verb segment
pub fn vcs_comment(phase: Phase) -> String {
    format!("vcs/comment/{}", phase)
}

/// Command envelope payload
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub command: String,
    pub options: AuditOptions,
    /// Absent at `run/start` and `action/start`
    pub report: Option<Report>,
}

/// Producer stage payload
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub kind: String,
    pub context: AuditContext,
    /// Absent at `audit/start`
    pub report: Option<Report>,
}

/// CLI output payload; `table` may be extended by handlers
#[derive(Debug, Clone)]
pub struct CliReportEvent {
    pub report: Report,
    pub table: Table,
    /// Rendered text, present at `write/end`
    pub contents: Option<String>,
}

/// File renderer payload
#[derive(Debug, Clone)]
pub struct OutputReportEvent {
    pub format: OutputFormat,
    pub file: PathBuf,
    pub report: Report,
    /// Rendered text, present at `report/end`
    pub contents: Option<String>,
}

/// File write payload
#[derive(Debug, Clone)]
pub struct FileWriteEvent {
    pub format: OutputFormat,
    pub file: PathBuf,
    pub contents: String,
}

/// Archive lookup request
#[derive(Debug, Clone)]
pub struct GetEvent {
    pub command: String,
}

/// Archive save request
#[derive(Debug, Clone)]
pub struct SaveEvent {
    pub command: String,
    pub report: Report,
}

/// VCS comment payload; handlers may edit the body before it is posted
#[derive(Debug, Clone)]
pub struct CommentEvent {
    pub comment: String,
}

/// Data handed to every handler of a hook
#[derive(Debug, Clone)]
pub enum HookPayload {
    Command(CommandEvent),
    Module(ModuleEvent),
    CliReport(CliReportEvent),
    OutputReport(OutputReportEvent),
    FileWrite(FileWriteEvent),
    Get(GetEvent),
    Save(SaveEvent),
    Comment(CommentEvent),
}

impl HookPayload {
    /// The report carried by this payload, if any
    pub fn report(&self) -> Option<&Report> {
        match self {
            HookPayload::Command(e) => e.report.as_ref(),
            HookPayload::Module(e) => e.report.as_ref(),
            HookPayload::CliReport(e) => Some(&e.report),
            HookPayload::OutputReport(e) => Some(&e.report),
            HookPayload::Save(e) => Some(&e.report),
            HookPayload::FileWrite(_) | HookPayload::Get(_) | HookPayload::Comment(_) => None,
        }
    }

    /// Mutable access to the carried report
    pub fn report_mut(&mut self) -> Option<&mut Report> {
        match self {
            HookPayload::Command(e) => e.report.as_mut(),
            HookPayload::Module(e) => e.report.as_mut(),
            HookPayload::CliReport(e) => Some(&mut e.report),
            HookPayload::OutputReport(e) => Some(&mut e.report),
            HookPayload::Save(e) => Some(&mut e.report),
            HookPayload::FileWrite(_) | HookPayload::Get(_) | HookPayload::Comment(_) => None,
        }
    }

    /// Consume the payload, handing the report back to the pipeline
    pub fn into_report(self) -> Option<Report> {
        match self {
            HookPayload::Command(e) => e.report,
            HookPayload::Module(e) => e.report,
            HookPayload::CliReport(e) => Some(e.report),
            HookPayload::OutputReport(e) => Some(e.report),
            HookPayload::Save(e) => Some(e.report),
            HookPayload::FileWrite(_) | HookPayload::Get(_) | HookPayload::Comment(_) => None,
        }
    }

    /// Command name for command envelope and archive payloads
    pub fn command(&self) -> Option<&str> {
        match self {
            HookPayload::Command(e) => Some(&e.command),
            HookPayload::Get(e) => Some(&e.command),
            HookPayload::Save(e) => Some(&e.command),
            _ => None,
        }
    }

    /// The CLI column table, when this is a CLI payload
    pub fn table_mut(&mut self) -> Option<&mut Table> {
        match self {
            HookPayload::CliReport(e) => Some(&mut e.table),
            _ => None,
        }
    }

    /// Variant name, for logs and error messages
    pub fn variant(&self) -> &'static str {
        match self {
            HookPayload::Command(_) => "command",
            HookPayload::Module(_) => "module",
            HookPayload::CliReport(_) => "cli-report",
            HookPayload::OutputReport(_) => "output-report",
            HookPayload::FileWrite(_) => "file-write",
            HookPayload::Get(_) => "get",
            HookPayload::Save(_) => "save",
            HookPayload::Comment(_) => "comment",
        }
    }
}
