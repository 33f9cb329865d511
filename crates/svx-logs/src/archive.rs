//! Gzip archiving of closed day files.
//!
//! An archive is written under a temporary name next to its target and only
//! renamed to `<file>.gz` once the gzip stream is complete and synced, so a
//! partial archive is never visible under its final name. The uncompressed
//! original is removed last.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::{Compression, GzBuilder};
use tracing::{info, warn};

use crate::error::{LogError, Result};
use crate::types::{archive_path, DayKey, LogLayout};

/// Suffix of the in-progress archive file.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Compresses `path` into `<path>.gz` and removes the original.
///
/// Returns the archive path.
///
/// # Errors
///
/// - [`LogError::Compression`] if reading, writing or renaming failed. No file
///   exists under the archive name and the original is untouched.
/// - [`LogError::OriginalNotRemoved`] if the archive is complete but the
///   original could not be deleted. The archive stays in place.
pub fn compress_file(path: &Path) -> Result<PathBuf> {
    let archive = archive_path(path);
    let temp = temp_path(&archive);

    if let Err(source) = write_archive(path, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(LogError::Compression {
            path: path.to_path_buf(),
            source,
        });
    }

    if let Err(source) = fs::rename(&temp, &archive) {
        let _ = fs::remove_file(&temp);
        return Err(LogError::Compression {
            path: path.to_path_buf(),
            source,
        });
    }

    if let Err(source) = fs::remove_file(path) {
        return Err(LogError::OriginalNotRemoved { archive, source });
    }

    Ok(archive)
}

/// Archives every uncompressed day file in the layout's directory that is
/// older than `today`, oldest first.
///
/// Such files are left behind by a crash, a failed compression or a day
/// switch that happened on the ingestion path. Leftover temporary archives
/// from interrupted runs are deleted. Failures are logged and skipped.
///
/// Returns the archives that now exist for the swept files.
pub fn compress_stale(layout: &LogLayout, today: DayKey) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(&layout.dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let temp_suffix = format!("{}{TEMP_SUFFIX}", layout.archive_suffix());
    let mut stale = Vec::new();

    for entry in entries.filter_map(std::result::Result::ok) {
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with(&layout.prefix) && name.ends_with(&temp_suffix) {
            match fs::remove_file(entry.path()) {
                Ok(()) => info!(path = %entry.path().display(), "removed interrupted archive"),
                Err(e) => warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "failed to remove interrupted archive"
                ),
            }
            continue;
        }

        if let Some(day) = layout.day_of(&name).filter(|day| *day < today) {
            stale.push((day, entry.path()));
        }
    }
    stale.sort();

    let mut archives = Vec::with_capacity(stale.len());
    for (day, path) in stale {
        match compress_file(&path) {
            Ok(archive) => {
                info!(%day, archive = %archive.display(), "compressed stale log file");
                archives.push(archive);
            }
            Err(LogError::OriginalNotRemoved { archive, source }) => {
                warn!(
                    %day,
                    archive = %archive.display(),
                    error = %source,
                    "compressed stale log file but failed removing original"
                );
                archives.push(archive);
            }
            Err(e) => warn!(%day, error = %e, "failed to compress stale log file"),
        }
    }
    Ok(archives)
}

fn temp_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn write_archive(source: &Path, temp: &Path) -> io::Result<()> {
    let mut input = File::open(source)?;
    let output = File::create(temp)?;

    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mtime = u32::try_from(Utc::now().timestamp()).unwrap_or(0);

    let mut encoder = GzBuilder::new()
        .filename(name)
        .mtime(mtime)
        .write(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;

    let output = encoder.finish()?;
    output.sync_all()
}
