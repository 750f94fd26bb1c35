//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur while running an audit
#[derive(Debug, Error)]
pub enum AuditError {
    /// A hook handler failed; fatal to the run that fired it
    #[error("Hook handler failed on '{event}': {reason}")]
    Hook {
        event: String,
        reason: String,
    },

    /// Hook name does not follow the `<subsystem>/<resource>/<verb>/<phase>` shape
    #[error("Invalid hook name '{0}'")]
    InvalidEvent(String),

    /// A producer could not complete its audit
    #[error("Producer '{kind}' failed: {reason}")]
    Producer {
        kind: String,
        reason: String,
    },

    /// Archive storage failure (get/save)
    #[error("Archive error: {0}")]
    Archive(String),

    /// Rendering or writing an output file failed
    #[error("Failed to write {format} output to '{file}': {reason}")]
    Output {
        format: String,
        file: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuditError {
    /// Build a hook failure for `event`
    pub fn hook(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Hook {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Build a producer failure for `kind`
    pub fn producer(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Producer {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
