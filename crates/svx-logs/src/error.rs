//! Error types for the capture pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the capture pipeline.
///
/// None of these are fatal to the daemon: each one is confined to the tick,
/// line or subprocess run that produced it.
#[derive(Debug, Error)]
pub enum LogError {
    /// The line source could not be launched.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Human-readable description of the source.
        command: String,
        /// Underlying launch error.
        #[source]
        source: std::io::Error,
    },

    /// The line source output became unreadable or the process died.
    #[error("line stream failed: {0}")]
    Stream(String),

    /// A line exceeded the maximum accepted length and was discarded.
    #[error("line exceeds {limit} bytes and was discarded")]
    LineTooLong {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A write was attempted with no log file open.
    #[error("log file not open")]
    NotOpen,

    /// Archiving a rotated file failed; the original is left in place.
    #[error("failed to compress {}: {source}", path.display())]
    Compression {
        /// File that was being compressed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The archive was written but the uncompressed original could not be removed.
    #[error("compressed to {} but failed removing original: {source}", archive.display())]
    OriginalNotRemoved {
        /// The archive that was successfully created.
        archive: PathBuf,
        /// Underlying removal error.
        #[source]
        source: std::io::Error,
    },

    /// Deleting an archive during retention enforcement failed.
    #[error("failed to prune {}: {source}", path.display())]
    Prune {
        /// Archive that could not be deleted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The classification pattern matched but required fields were missing.
    #[error("parse error: {0}")]
    Parse(String),

    /// The classification pattern is unusable.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The event sink rejected an event.
    #[error("event sink error: {0}")]
    Sink(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LogError {
    /// Returns true if the error still left a usable archive behind.
    #[must_use]
    pub const fn archive_created(&self) -> bool {
        matches!(self, Self::OriginalNotRemoved { .. })
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, LogError>;
