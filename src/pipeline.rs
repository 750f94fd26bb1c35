//! Audit pipeline
//!
//! Drives one command run through its fixed stages:
//!
//! ```text
//! run/start → action/start
//!   → per route: per producer { audit/start → produce → audit/end → report/start → report/end }
//!   → assemble → action/end
//!   → cli report/write hooks → file output hooks per format → vcs comment
//! → run/end
//! ```
//!
//! The report is the only mutable state shared between stages. It is moved
//! into each hook payload and taken back out after the handlers ran, so only
//! one stage owns it at any time.

use crate::bus::EventBus;
use crate::config::AuditOptions;
use crate::error::{AuditError, Result};
use crate::events::{
    self, CliReportEvent, CommandEvent, CommentEvent, FileWriteEvent, HookPayload, ModuleEvent,
    OutputReportEvent, Phase,
};
use crate::output::{self, Commenter, JsonRenderer, OutputFormat, Renderer, Table};
use crate::types::{Report, ReportItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Item `type` of the per-route groups of a multi-route run
pub const ROUTE_KIND: &str = "route";

/// What a producer knows about the variant it measures
#[derive(Debug, Clone, PartialEq)]
pub struct AuditContext {
    pub command: String,
    pub cwd: PathBuf,
    /// Route of this variant; `None` for single-variant runs without routes
    pub route: Option<String>,
    pub url: Option<String>,
    pub check_thresholds: bool,
    /// Zero-based index of the variant
    pub variant: usize,
}

/// An audit module yielding a report
///
/// Expected per-item failures must be encoded as `success: false` items.
/// Return `Err` only when the module cannot run at all; the pipeline then
/// records an error slot and keeps going with the other producers.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Producer kind, used in hook names and as the error slot label
    fn kind(&self) -> &str;

    async fn audit(&self, ctx: &AuditContext) -> Result<Report>;
}

/// Run independent measurements concurrently, keeping their order
///
/// Each future owns its own output slot, so results never share an item.
pub async fn measure_all<I, F, T>(tasks: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T>,
{
    futures::future::join_all(tasks).await
}

/// One configured output file
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub format: OutputFormat,
    pub file: PathBuf,
    pub written: bool,
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub run_id: String,
    pub report: Report,
    /// Rendered CLI table
    pub cli: String,
    pub outputs: Vec<OutputRecord>,
    pub commented: bool,
}

impl AuditOutcome {
    /// Process exit code; auxiliary output failures never change it
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }
}

/// Orchestrates producers, hooks and outputs for one command
pub struct AuditPipeline {
    bus: Arc<EventBus>,
    producers: Vec<Arc<dyn Producer>>,
    renderers: HashMap<OutputFormat, Arc<dyn Renderer>>,
    commenter: Option<Arc<dyn Commenter>>,
}

impl std::fmt::Debug for AuditPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditPipeline")
            .field(
                "producers",
                &self.producers.iter().map(|p| p.kind()).collect::<Vec<_>>(),
            )
            .field("renderers", &self.renderers.keys().collect::<Vec<_>>())
            .field("commenter", &self.commenter.is_some())
            .finish()
    }
}

impl AuditPipeline {
    /// Create a pipeline firing hooks on `bus`; JSON output is built in
    pub fn new(bus: Arc<EventBus>) -> Self {
        let mut renderers: HashMap<OutputFormat, Arc<dyn Renderer>> = HashMap::new();
        renderers.insert(OutputFormat::Json, Arc::new(JsonRenderer));

        Self {
            bus,
            producers: Vec::new(),
            renderers,
            commenter: None,
        }
    }

    /// Add a producer; producers run in the order they were added
    pub fn with_producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producers.push(producer);
        self
    }

    /// Set the renderer of a file format
    pub fn with_renderer(mut self, format: OutputFormat, renderer: Arc<dyn Renderer>) -> Self {
        self.renderers.insert(format, renderer);
        self
    }

    pub fn with_commenter(mut self, commenter: Arc<dyn Commenter>) -> Self {
        self.commenter = Some(commenter);
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run `command` end to end
    ///
    /// Producer failures and output write failures are recovered. A failing
    /// hook handler aborts the run with [`AuditError::Hook`].
    pub async fn run(&self, command: &str, options: &AuditOptions) -> Result<AuditOutcome> {
        options.validate()?;
        let run_id = format!("run-{}", uuid::Uuid::new_v4());

        tracing::info!(
            run_id = %run_id,
            command = %command,
            routes = options.routes.len(),
            producers = self.producers.len(),
            "Audit run started"
        );

        let event = events::command_run(command, Phase::Start);
        self.fire_command(&event, command, options, None).await?;

        let event = events::command_action(command, Phase::Start);
        self.fire_command(&event, command, options, None).await?;

        let report = self.produce(command, options).await?;

        let event = events::command_action(command, Phase::End);
        let report = self
            .fire_command(&event, command, options, Some(report))
            .await?
            .ok_or_else(|| AuditError::hook(&event, "handler removed the report"))?;

        let (report, cli) = self.write_cli(report, options).await?;
        let (report, outputs) = self.write_files(report, options).await?;
        let commented = self.comment(&report, options).await?;

        let event = events::command_run(command, Phase::End);
        let report = self
            .fire_command(&event, command, options, Some(report))
            .await?
            .ok_or_else(|| AuditError::hook(&event, "handler removed the report"))?;

        tracing::info!(
            run_id = %run_id,
            command = %command,
            success = report.success,
            outputs = outputs.iter().filter(|o| o.written).count(),
            "Audit run finished"
        );

        Ok(AuditOutcome {
            run_id,
            report,
            cli,
            outputs,
            commented,
        })
    }

    /// Fire `event`, rejecting handlers that swap the payload variant
    ///
    /// A report handed back by the handlers is re-aggregated, so leaves they
    /// flipped reach every ancestor group and the root.
    async fn fire_payload(&self, event: &str, mut payload: HookPayload) -> Result<HookPayload> {
        let variant = payload.variant();
        self.bus.fire(event, &mut payload).await?;

        if payload.variant() != variant {
            return Err(AuditError::hook(
                event,
                format!(
                    "handler replaced the {} payload with {}",
                    variant,
                    payload.variant()
                ),
            ));
        }
        if let Some(report) = payload.report_mut() {
            report.reaggregate();
        }
        Ok(payload)
    }

    async fn fire_command(
        &self,
        event: &str,
        command: &str,
        options: &AuditOptions,
        report: Option<Report>,
    ) -> Result<Option<Report>> {
        let payload = HookPayload::Command(CommandEvent {
            command: command.to_string(),
            options: options.clone(),
            report,
        });
        Ok(self.fire_payload(event, payload).await?.into_report())
    }

    async fn fire_module(
        &self,
        event: &str,
        kind: &str,
        context: AuditContext,
        report: Option<Report>,
    ) -> Result<ModuleEvent> {
        let payload = HookPayload::Module(ModuleEvent {
            kind: kind.to_string(),
            context,
            report,
        });
        match self.fire_payload(event, payload).await? {
            HookPayload::Module(module) => Ok(module),
            other => Err(unexpected(event, &other)),
        }
    }

    async fn produce(&self, command: &str, options: &AuditOptions) -> Result<Report> {
        let routes: Vec<Option<String>> = if options.routes.is_empty() {
            vec![None]
        } else {
            options.routes.iter().cloned().map(Some).collect()
        };

        let producers: Vec<&Arc<dyn Producer>> = self
            .producers
            .iter()
            .filter(|p| options.is_enabled(p.kind()))
            .collect();

        let mut invariant: HashMap<String, Report> = HashMap::new();
        let mut variants = Vec::with_capacity(routes.len());

        for (index, route) in routes.into_iter().enumerate() {
            let context = AuditContext {
                command: command.to_string(),
                cwd: options.cwd.clone(),
                url: route.as_deref().and_then(|r| options.url_for(r)),
                route: route.clone(),
                check_thresholds: options.check_thresholds,
                variant: index,
            };

            let mut slots = Vec::with_capacity(producers.len());
            for producer in producers.iter().copied() {
                let kind = producer.kind().to_string();
                let shared = options.is_route_invariant(&kind);

                let report = match invariant.get(&kind) {
                    Some(cached) if shared => {
                        tracing::debug!(kind = %kind, variant = index, "Reusing route-invariant result");
                        cached.clone()
                    }
                    _ => {
                        let report = self.run_producer(producer.as_ref(), &context).await?;
                        if shared {
                            invariant.insert(kind.clone(), report.clone());
                        }
                        report
                    }
                };
                slots.push((kind, report));
            }
            variants.push((route, slots));
        }

        Ok(assemble(variants))
    }

    async fn run_producer(&self, producer: &dyn Producer, context: &AuditContext) -> Result<Report> {
        let kind = producer.kind();

        let event = events::module_audit(kind, Phase::Start);
        // start handlers may adjust the context the producer sees
        let context = self.fire_module(&event, kind, context.clone(), None).await?.context;

        let report = match producer.audit(&context).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(
                    kind = %kind,
                    route = ?context.route,
                    error = %e,
                    "Producer failed; recording error slot"
                );
                Report::failed(&e)
            }
        };

        let mut report = Some(report);
        for event in [
            events::module_audit(kind, Phase::End),
            events::module_report(kind, Phase::Start),
        ] {
            report = self.fire_module(&event, kind, context.clone(), report).await?.report;
        }

        let report = report
            .ok_or_else(|| AuditError::hook(events::module_report(kind, Phase::Start), "handler removed the report"))?;

        let event = events::module_report(kind, Phase::End);
        let report = self
            .fire_module(&event, kind, context.clone(), Some(report))
            .await?
            .report
            .ok_or_else(|| AuditError::hook(&event, "handler removed the report"))?;

        tracing::info!(
            kind = %kind,
            route = ?context.route,
            success = report.success,
            "Producer finished"
        );
        Ok(report)
    }

    async fn write_cli(&self, report: Report, options: &AuditOptions) -> Result<(Report, String)> {
        let mut payload = HookPayload::CliReport(CliReportEvent {
            report,
            table: Table::for_options(options.check_thresholds),
            contents: None,
        });

        for event in [
            events::cli_report(Phase::Start),
            events::cli_report(Phase::End),
            events::cli_write(Phase::Start),
        ] {
            payload = self.fire_payload(&event, payload).await?;
        }

        let event = events::cli_write(Phase::End);
        let mut cli = match payload {
            HookPayload::CliReport(cli) => cli,
            other => return Err(unexpected(&event, &other)),
        };
        let contents = cli.table.render(&cli.report);
        cli.contents = Some(contents.clone());

        match self.fire_payload(&event, HookPayload::CliReport(cli)).await? {
            HookPayload::CliReport(cli) => Ok((cli.report, contents)),
            other => Err(unexpected(&event, &other)),
        }
    }

    async fn write_files(
        &self,
        mut report: Report,
        options: &AuditOptions,
    ) -> Result<(Report, Vec<OutputRecord>)> {
        let mut records = Vec::new();

        for (format, path) in options.outputs.files() {
            let file = options.resolve(path);
            let (next, written) = self.write_output(report, format, &file, options).await?;
            report = next;
            records.push(OutputRecord {
                format,
                file,
                written,
            });
        }

        Ok((report, records))
    }

    async fn write_output(
        &self,
        report: Report,
        format: OutputFormat,
        file: &Path,
        options: &AuditOptions,
    ) -> Result<(Report, bool)> {
        let Some(renderer) = self.renderers.get(&format) else {
            tracing::warn!(format = %format, file = %file.display(), "No renderer registered; skipping output");
            return Ok((report, false));
        };

        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(
                    format = %format,
                    dir = %parent.display(),
                    error = %e,
                    "Could not create output directory"
                );
                return Ok((report, false));
            }
        }

        let event = events::output_report(format, Phase::Start);
        let payload = self
            .fire_payload(
                &event,
                HookPayload::OutputReport(OutputReportEvent {
                    format,
                    file: file.to_path_buf(),
                    report,
                    contents: None,
                }),
            )
            .await?;
        let mut output = match payload {
            HookPayload::OutputReport(output) => output,
            other => return Err(unexpected(&event, &other)),
        };

        let rendered = match renderer.render(&output.report, options) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(format = %format, file = %file.display(), error = %e, "Renderer failed");
                return Ok((output.report, false));
            }
        };
        output.contents = Some(rendered);

        let event = events::output_report(format, Phase::End);
        let payload = self
            .fire_payload(&event, HookPayload::OutputReport(output))
            .await?;
        let output = match payload {
            HookPayload::OutputReport(output) => output,
            other => return Err(unexpected(&event, &other)),
        };

        let contents = output.contents.unwrap_or_default();
        let written = self.write_file(format, file, contents).await?;
        Ok((output.report, written))
    }

    /// Write one output file between the file write hooks
    ///
    /// I/O errors are logged and reported as `false`; they never fail the run.
    async fn write_file(&self, format: OutputFormat, file: &Path, contents: String) -> Result<bool> {
        let event = events::file_write(Phase::Start);
        let payload = self
            .fire_payload(
                &event,
                HookPayload::FileWrite(FileWriteEvent {
                    format,
                    file: file.to_path_buf(),
                    contents,
                }),
            )
            .await?;
        let write = match payload {
            HookPayload::FileWrite(write) => write,
            other => return Err(unexpected(&event, &other)),
        };

        if let Err(e) = tokio::fs::write(&write.file, write.contents.as_bytes()).await {
            let err = AuditError::Output {
                format: format.to_string(),
                file: write.file.display().to_string(),
                reason: e.to_string(),
            };
            tracing::warn!(error = %err, "Report could not be written");
            return Ok(false);
        }

        let event = events::file_write(Phase::End);
        let path = write.file.clone();
        self.fire_payload(&event, HookPayload::FileWrite(write)).await?;

        tracing::info!(format = %format, file = %path.display(), "Report written");
        Ok(true)
    }

    async fn comment(&self, report: &Report, options: &AuditOptions) -> Result<bool> {
        if !options.comment {
            return Ok(false);
        }

        let (Some(commenter), Some(markdown)) =
            (&self.commenter, self.renderers.get(&OutputFormat::Markdown))
        else {
            tracing::debug!("Commenting enabled without a commenter and markdown renderer");
            return Ok(false);
        };

        let body = match output::render_comment(report, markdown.as_ref(), options) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Could not render comment");
                return Ok(false);
            }
        };
        if body.is_empty() {
            return Ok(false);
        }

        let event = events::vcs_comment(Phase::Start);
        let payload = self
            .fire_payload(&event, HookPayload::Comment(CommentEvent { comment: body }))
            .await?;
        let comment = match payload {
            HookPayload::Comment(comment) => comment,
            other => return Err(unexpected(&event, &other)),
        };

        let posted = match commenter.comment(&comment.comment).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not post comment");
                false
            }
        };

        let event = events::vcs_comment(Phase::End);
        self.fire_payload(&event, HookPayload::Comment(comment)).await?;

        Ok(posted)
    }
}

fn unexpected(event: &str, payload: &HookPayload) -> AuditError {
    AuditError::hook(event, format!("unexpected {} payload", payload.variant()))
}

/// Merge per-variant producer reports into the run report
///
/// A failed producer becomes an error slot; with several routes every route
/// becomes its own group so sibling `rawLabel`s stay unique.
fn assemble(variants: Vec<(Option<String>, Vec<(String, Report)>)>) -> Report {
    let multi = variants.len() > 1;
    let mut items = Vec::new();
    let mut raw_reports = Vec::new();

    for (route, slots) in variants {
        let mut route_items = Vec::new();
        let mut producer_reports = Vec::with_capacity(slots.len());

        for (kind, report) in slots {
            match &report.error {
                Some(error) => route_items.push(ReportItem::failed_slot(&kind, error.clone())),
                None => route_items.extend(report.items().iter().cloned()),
            }
            producer_reports.push(report);
        }

        match route {
            Some(route) if multi => {
                let mut variant = Report::new(route_items.clone());
                variant.raw_reports = producer_reports;
                raw_reports.push(variant);
                items.push(ReportItem::group(route.clone(), route, ROUTE_KIND, route_items));
            }
            _ => {
                items.extend(route_items);
                raw_reports.extend(producer_reports);
            }
        }
    }

    let mut report = Report::new(items);
    report.raw_reports = raw_reports;
    report
}
