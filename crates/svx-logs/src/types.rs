//! Core types for the capture pipeline.
//!
//! This module provides:
//! - [`DayKey`] - Calendar day that selects the physical log file
//! - [`LogLayout`] - Naming scheme for day files and their archives
//! - [`ExtractedEvent`] - Named fields pulled out of a classified line

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to a day file once it has been compressed.
pub const ARCHIVE_EXTENSION: &str = "gz";

/// Calendar date in local time, formatted as `YYYY-MM-DD`.
///
/// Lexical order of the formatted key equals chronological order, which the
/// retention pruner relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Creates a key for the given date.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Creates a key from year, month and day, if the date exists.
    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Returns the key for the current local day.
    #[must_use]
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    /// Returns the underlying date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }

    /// Returns the following calendar day.
    #[must_use]
    pub fn succ(&self) -> Option<Self> {
        self.0.succ_opt().map(Self)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

/// Naming scheme for day files: `<dir>/<prefix><YYYY-MM-DD>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLayout {
    /// Directory holding day files and archives.
    pub dir: PathBuf,
    /// File name prefix shared by every day file.
    pub prefix: String,
    /// Extension of uncompressed day files, without the dot.
    pub extension: String,
}

impl Default for LogLayout {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/log/svxlink"),
            prefix: "log_svxlink_".to_string(),
            extension: "txt".to_string(),
        }
    }
}

impl LogLayout {
    /// Creates a layout rooted at `dir` with the default prefix and extension.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets the file prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the day file extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// File name of the day file for `day`.
    #[must_use]
    pub fn file_name(&self, day: DayKey) -> String {
        format!("{}{}.{}", self.prefix, day, self.extension)
    }

    /// Full path of the day file for `day`.
    #[must_use]
    pub fn path_for_day(&self, day: DayKey) -> PathBuf {
        self.dir.join(self.file_name(day))
    }

    /// Full path of the archive for `day`.
    #[must_use]
    pub fn archive_for_day(&self, day: DayKey) -> PathBuf {
        archive_path(&self.path_for_day(day))
    }

    /// Suffix shared by every archive, e.g. `.txt.gz`.
    #[must_use]
    pub fn archive_suffix(&self) -> String {
        format!(".{}.{ARCHIVE_EXTENSION}", self.extension)
    }

    /// Extracts the day from an uncompressed day file name.
    ///
    /// Returns `None` for archives and for names outside this layout.
    #[must_use]
    pub fn day_of(&self, file_name: &str) -> Option<DayKey> {
        let rest = file_name.strip_prefix(&self.prefix)?;
        let date = rest.strip_suffix(&format!(".{}", self.extension))?;
        date.parse().ok()
    }
}

/// Returns the archive path for an uncompressed file: `<path>.gz`.
#[must_use]
pub fn archive_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Named fields extracted from a line that matched the classification pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedEvent {
    /// When the line was classified.
    pub observed_at: DateTime<Utc>,
    /// Captured substrings keyed by capture name.
    pub fields: BTreeMap<String, String>,
    /// The raw line the fields were taken from.
    pub line: String,
}

impl ExtractedEvent {
    /// Creates an event observed now.
    #[must_use]
    pub fn new(fields: BTreeMap<String, String>, line: impl Into<String>) -> Self {
        Self {
            observed_at: Utc::now(),
            fields,
            line: line.into(),
        }
    }

    /// Returns the captured value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Serializes the event to a single JSON line.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
