//! Report archives
//!
//! Pluggable storage for previously produced reports, keyed by command.
//! Stores are only reached through the `plugin/last-value/report/{get,save}`
//! hooks (see [`crate::plugin::archive::ArchivePlugin`]), so a backend can
//! be swapped without touching the pipeline.

use crate::error::{AuditError, Result};
use crate::types::Report;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Archived report payload: a serialized JSON string or a structured tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredReport {
    Serialized(String),
    Structured(Box<Report>),
}

impl StoredReport {
    /// Decode the payload into a report
    pub fn into_report(self) -> Result<Report> {
        match self {
            StoredReport::Serialized(json) => Ok(serde_json::from_str(&json)?),
            StoredReport::Structured(report) => Ok(*report),
        }
    }
}

/// One archived row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub command: String,
    pub report: StoredReport,
    pub saved_at: DateTime<Utc>,
}

/// Storage backend for archived reports
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Latest archived report of `command`, if any
    async fn get(&self, command: &str) -> Result<Option<ArchiveRecord>>;

    /// Replace the archived report of `command`
    async fn save(&self, command: &str, report: &Report) -> Result<()>;
}

/// In-memory archive for tests and single-process use
#[derive(Debug, Default)]
pub struct MemoryArchive {
    records: RwLock<HashMap<String, ArchiveRecord>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pre-serialized payload as-is, valid or not
    pub async fn insert_raw(&self, command: &str, json: impl Into<String>) {
        self.records.write().await.insert(
            command.to_string(),
            ArchiveRecord {
                command: command.to_string(),
                report: StoredReport::Serialized(json.into()),
                saved_at: Utc::now(),
            },
        );
    }

    /// Number of archived commands
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn get(&self, command: &str) -> Result<Option<ArchiveRecord>> {
        Ok(self.records.read().await.get(command).cloned())
    }

    async fn save(&self, command: &str, report: &Report) -> Result<()> {
        self.records.write().await.insert(
            command.to_string(),
            ArchiveRecord {
                command: command.to_string(),
                report: StoredReport::Structured(Box::new(report.clone())),
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// JSON file archive: one `<command>.json` file per command
///
/// Writes go to a temp file that is renamed over the target, so a crashed
/// run never leaves a truncated archive behind.
#[derive(Debug, Clone)]
pub struct FileArchive {
    dir: PathBuf,
}

impl FileArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the archive of `command`
    pub fn path_for(&self, command: &str) -> PathBuf {
        let name: String = command
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl ArchiveStore for FileArchive {
    async fn get(&self, command: &str) -> Result<Option<ArchiveRecord>> {
        let path = self.path_for(command);

        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No archive file");
                return Ok(None);
            }
            Err(e) => {
                return Err(AuditError::Archive(format!(
                    "Failed to read archive {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let record: ArchiveRecord = serde_json::from_str(&json).map_err(|e| {
            AuditError::Archive(format!(
                "Failed to parse archive {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %path.display(), saved_at = %record.saved_at, "Archive loaded");
        Ok(Some(record))
    }

    async fn save(&self, command: &str, report: &Report) -> Result<()> {
        let path = self.path_for(command);
        let record = ArchiveRecord {
            command: command.to_string(),
            report: StoredReport::Serialized(serde_json::to_string(report)?),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            AuditError::Archive(format!(
                "Failed to create archive directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            AuditError::Archive(format!(
                "Failed to write archive {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            AuditError::Archive(format!(
                "Failed to rename archive {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::debug!(path = %path.display(), command = %command, "Archive saved");
        Ok(())
    }
}
