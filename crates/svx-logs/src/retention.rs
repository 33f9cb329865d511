//! Count-based retention over compressed archives.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{LogError, Result};

/// Outcome of a pruning pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Archives that were matched before pruning.
    pub matched: usize,
    /// Archives that were deleted, oldest first.
    pub removed: Vec<PathBuf>,
    /// Archives that could not be deleted.
    pub failed: Vec<LogError>,
}

impl PruneReport {
    /// Returns true if nothing was deleted and nothing failed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Keeps only the newest `keep` archives in `dir` whose names start with
/// `prefix` and end with `suffix`.
///
/// Names embed the day as `YYYY-MM-DD`, so sorting by name sorts by date.
/// A `keep` of zero or less disables pruning. A failed deletion is recorded
/// in the report and does not stop the remaining deletions.
///
/// # Errors
///
/// Returns an error only if the directory cannot be listed.
pub fn prune(dir: &Path, prefix: &str, suffix: &str, keep: i64) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if keep <= 0 {
        return Ok(report);
    }

    let mut archives: Vec<(String, PathBuf)> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            (name.starts_with(prefix) && name.ends_with(suffix)).then(|| (name, e.path()))
        })
        .collect();
    archives.sort();
    report.matched = archives.len();

    let keep = usize::try_from(keep).unwrap_or(usize::MAX);
    let excess = archives.len().saturating_sub(keep);

    for (_, path) in archives.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "pruned old archive");
                report.removed.push(path);
            }
            Err(source) => {
                warn!(path = %path.display(), error = %source, "failed to prune archive");
                report.failed.push(LogError::Prune { path, source });
            }
        }
    }

    Ok(report)
}
