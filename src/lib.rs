//! # a3s-audit
//!
//! Hook-driven audit report pipeline for web builds.
//!
//! ## Overview
//!
//! `a3s-audit` runs audit producers (bundle size, Lighthouse scores, unused
//! source, heap snapshots), assembles their results into one recursive
//! [`Report`], judges values against thresholds, and lets plugins observe and
//! mutate the report at every stage through a priority-ordered [`EventBus`].
//! The bundled last-value plugin compares each run with the archived report
//! of the same command and can fail the build on regressions.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_audit::{
//!     AuditContext, AuditOptions, AuditPipeline, EventBus, Producer, Report, ReportItem,
//!     ThresholdLimit,
//! };
//!
//! struct BundleSize;
//!
//! #[async_trait::async_trait]
//! impl Producer for BundleSize {
//!     fn kind(&self) -> &str {
//!         "size"
//!     }
//!
//!     async fn audit(&self, ctx: &AuditContext) -> a3s_audit::Result<Report> {
//!         let leaf = ReportItem::leaf("main.js", "/build/main.js", "size")
//!             .value("900 B", 900.0)
//!             .threshold("1 KB", 1024.0, ThresholdLimit::Upper)
//!             .evaluate(ctx.check_thresholds);
//!         Ok(Report::new(vec![ReportItem::group("Size Checks", "size", "size", vec![leaf])]))
//!     }
//! }
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let bus = Arc::new(EventBus::new());
//! let pipeline = AuditPipeline::new(bus.clone()).with_producer(Arc::new(BundleSize));
//!
//! let outcome = pipeline.run("audit", &AuditOptions::default()).await?;
//! println!("{}", outcome.cli);
//! std::process::exit(outcome.exit_code());
//! # }
//! ```
//!
//! ## Hooks
//!
//! Hook names follow `<subsystem>/<resource>/<verb>/<phase>`:
//!
//! - `command/<cmd>/run/{start,end}`, `command/<cmd>/action/{start,end}`
//! - `module/<kind>/audit/{start,end}`, `module/<kind>/report/{start,end}`
//! - `output/cli/report/{start,end}`, `output/cli/write/{start,end}`
//! - `output/{html,json,markdown}/report/{start,end}`, `output/file/write/{start,end}`
//! - `plugin/last-value/report/{get,save}`, `vcs/comment/{start,end}`
//!
//! ## Architecture
//!
//! - **EventBus**: sequential, priority-ordered, fail-fast hook dispatch
//! - **Report / ReportItem**: leaf measurements and cached group aggregates
//! - **threshold**: pure pass/fail evaluation
//! - **AuditPipeline**: producers, lifecycle hooks, CLI and file outputs
//! - **LastValuePlugin / ArchivePlugin**: archive diffing and persistence

pub mod archive;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod threshold;
pub mod types;

// Re-export core types
pub use archive::{ArchiveRecord, ArchiveStore, FileArchive, MemoryArchive, StoredReport};
pub use bus::{EventBus, FireOutcome, HandlerId, HookHandler, HookReturn, DEFAULT_PRIORITY};
pub use config::{
    AuditOptions, BreachThreshold, Compression, LastValueConfig, Outputs, ThresholdConfig,
    ThresholdRule, Thresholds, ValueKind,
};
pub use error::{AuditError, Result};
pub use events::{HookPayload, Phase};
pub use output::{
    Column, ColumnKind, Commenter, JsonRenderer, MarkdownRenderer, OutputFormat, Renderer, Table,
};
pub use pipeline::{measure_all, AuditContext, AuditOutcome, AuditPipeline, OutputRecord, Producer};
pub use plugin::{ArchivePlugin, DiffSummary, LastValuePlugin};
pub use threshold::evaluate;
pub use types::{LeafBuilder, Report, ReportError, ReportItem, Scalar, ThresholdLimit};
