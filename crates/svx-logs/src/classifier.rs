//! Pattern-based classification of captured lines.
//!
//! Every captured line is offered to the [`Classifier`]. Lines that do not
//! match are ignored here; the writer persists them regardless. Lines that
//! match produce an [`ExtractedEvent`] with one entry per named capture group.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{LogError, Result};
use crate::types::ExtractedEvent;

/// Node-info announcement emitted by SvxLink and SvxReflector.
///
/// Only the callsign and the `NodeInfo` marker are mandatory for the line to
/// match; the attribute groups are optional so that truncated announcements
/// still match and can be reported as incomplete.
pub const DEFAULT_PATTERN: &str = r"\b(?P<callsign>[A-Z0-9]+(?:-[A-Z0-9]+)?): NodeInfo(?: app=(?P<application>\S+))?(?: platform=(?P<platform>\S+))?(?: device=(?P<device>\S+))?(?: os=(?P<os>\S+))?(?: version=(?P<version>\S+))?";

/// Capture names that must all be present for a match to become an event.
pub const DEFAULT_REQUIRED_FIELDS: [&str; 6] =
    ["callsign", "application", "platform", "device", "os", "version"];

/// Extracts named fields from lines matching a fixed pattern.
#[derive(Debug, Clone)]
pub struct Classifier {
    pattern: Regex,
    required: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Creates a classifier with the built-in node-info pattern.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_PATTERN)
                .expect("built-in classification pattern must compile"),
            required: DEFAULT_REQUIRED_FIELDS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Creates a classifier with a custom pattern and required capture names.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidPattern`] if the pattern does not compile,
    /// if no fields are required, or if a required name is not a capture
    /// group of the pattern.
    pub fn with_pattern<S: AsRef<str>>(pattern: &str, required: &[S]) -> Result<Self> {
        let pattern =
            Regex::new(pattern).map_err(|e| LogError::InvalidPattern(e.to_string()))?;

        if required.is_empty() {
            return Err(LogError::InvalidPattern(
                "at least one required field must be named".to_string(),
            ));
        }

        let names: Vec<&str> = pattern.capture_names().flatten().collect();
        let required: Vec<String> = required.iter().map(|s| s.as_ref().to_string()).collect();
        if let Some(missing) = required.iter().find(|r| !names.contains(&r.as_str())) {
            return Err(LogError::InvalidPattern(format!(
                "pattern has no capture group named `{missing}`"
            )));
        }

        Ok(Self { pattern, required })
    }

    /// Returns the capture names required for an event.
    #[must_use]
    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    /// Classifies a line.
    ///
    /// Returns `Ok(None)` when the line does not match and `Ok(Some(event))`
    /// when it matches with every required field captured.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Parse`] when the line matches but one or more
    /// required fields were not captured. The event is dropped.
    pub fn classify(&self, line: &str) -> Result<Option<ExtractedEvent>> {
        let Some(captures) = self.pattern.captures(line) else {
            return Ok(None);
        };

        let mut fields = BTreeMap::new();
        for name in self.pattern.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                fields.insert(name.to_string(), value.as_str().to_string());
            }
        }

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|r| !fields.contains_key(r.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(LogError::Parse(format!(
                "captured {} of {} required fields, missing {}",
                self.required.len() - missing.len(),
                self.required.len(),
                missing.join(", ")
            )));
        }

        Ok(Some(ExtractedEvent::new(fields, line)))
    }
}
