//! Domain-specific error types following panic-free policy.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading a session log.
#[derive(Error, Debug)]
pub enum LogError {
    /// The log file could not be opened or read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single line was not a valid log entry
    #[error("Failed to parse log line: {0}")]
    Parse(#[from] serde_json::Error),

    /// New bytes were read but none of them parsed as an entry
    #[error("No parseable entries in {lines} new line(s) of {path}")]
    Unparsed { path: PathBuf, lines: usize },
}

impl LogError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;
