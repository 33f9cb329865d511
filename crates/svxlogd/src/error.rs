//! Error types for svxlogd.

use thiserror::Error;

/// Errors that can occur while setting up the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Capture pipeline error.
    #[error("capture error: {0}")]
    Capture(#[from] svx_logs::LogError),
}
