//! First-party plugins built on the hook bus
//!
//! - `last_value`: diffs a run against the archived report of its command
//! - `archive`: serves the last-value archive hooks from an `ArchiveStore`

pub mod archive;
pub mod last_value;

pub use archive::ArchivePlugin;
pub use last_value::{DiffSummary, LastValuePlugin};
