//! Destinations for extracted events.
//!
//! This module provides the [`EventSink`] trait and default implementations.
//! Delivery is synchronous and best-effort: the controller logs a failed
//! delivery and moves on to the next line.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{LogError, Result};
use crate::types::ExtractedEvent;

/// Trait for extracted-event destinations.
///
/// Implement this trait to forward events to a custom backend
/// (e.g., a database or an HTTP collector).
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be stored. The caller does not
    /// retry.
    fn deliver(&self, event: &ExtractedEvent) -> Result<()>;
}

/// Sink that emits each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    /// Creates a new tracing sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventSink for TracingEventSink {
    fn deliver(&self, event: &ExtractedEvent) -> Result<()> {
        let fields = serde_json::to_string(&event.fields)?;
        tracing::info!(
            target: "svx_logs::events",
            observed_at = %event.observed_at,
            callsign = event.get("callsign").unwrap_or_default(),
            fields = %fields,
            "extracted event"
        );
        Ok(())
    }
}

/// Sink that appends each event as one JSON object per line.
pub struct JsonLinesEventSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesEventSink {
    /// Opens (or creates) the target file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonLinesEventSink {
    fn deliver(&self, event: &ExtractedEvent) -> Result<()> {
        let mut line = event.to_json()?;
        line.push('\n');
        self.file
            .lock()
            .write_all(line.as_bytes())
            .map_err(|e| LogError::Sink(format!("{}: {e}", self.path.display())))
    }
}

impl std::fmt::Debug for JsonLinesEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesEventSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A sink that discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn deliver(&self, _event: &ExtractedEvent) -> Result<()> {
        Ok(())
    }
}

/// A boxed sink for dynamic dispatch.
pub type BoxedEventSink = Box<dyn EventSink>;

impl EventSink for BoxedEventSink {
    fn deliver(&self, event: &ExtractedEvent) -> Result<()> {
        (**self).deliver(event)
    }
}
