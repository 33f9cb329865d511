//! Day-keyed buffered log writer.
//!
//! This module provides [`RotatingWriter`], the single owner of the open day
//! file. Every operation takes the same lock, so appends from the ingestion
//! task and flushes or rotations from the controller never interleave.
//!
//! The writer never decides on its own that a day has ended. Callers pass the
//! day explicitly, and the controller drives [`RotatingWriter::close`] when it
//! notices the open day is stale.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{LogError, Result};
use crate::types::{DayKey, LogLayout};

/// Size of the in-memory buffer in front of the open day file.
pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Internal state guarded by the writer lock.
#[derive(Default)]
struct WriterState {
    /// Open day and its buffered handle. Both are present or neither is.
    current: Option<(DayKey, BufWriter<File>)>,
    /// Days whose files were closed and are ready for archiving.
    retired: Vec<DayKey>,
}

/// Thread-safe writer that appends lines to one file per calendar day.
pub struct RotatingWriter {
    layout: LogLayout,
    state: Mutex<WriterState>,
}

impl RotatingWriter {
    /// Creates a writer for the given layout. No file is opened until the
    /// first [`open_for_day`](Self::open_for_day) or
    /// [`write_line`](Self::write_line).
    #[must_use]
    pub fn new(layout: LogLayout) -> Self {
        Self {
            layout,
            state: Mutex::new(WriterState::default()),
        }
    }

    /// Returns the naming scheme used by this writer.
    #[must_use]
    pub const fn layout(&self) -> &LogLayout {
        &self.layout
    }

    /// Makes the file for `day` current.
    ///
    /// A no-op when that file is already open. Otherwise the open file, if
    /// any, is flushed, synced, closed and retired before the new one is
    /// opened in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be opened. The writer is then left with no file open.
    pub fn open_for_day(&self, day: DayKey) -> Result<()> {
        let mut state = self.state.lock();
        self.open_locked(&mut state, day)
    }

    /// Appends `line` and a newline to the current file's buffer.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NotOpen`] if no file is open, or an I/O error if the
    /// buffer could not be written through.
    pub fn append(&self, line: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::append_locked(&mut state, line)
    }

    /// Opens the file for `day` if needed and appends `line`, under one lock.
    ///
    /// A rotation on another thread can never land between the open and the
    /// append.
    pub fn write_line(&self, day: DayKey, line: &str) -> Result<()> {
        let mut state = self.state.lock();
        self.open_locked(&mut state, day)?;
        Self::append_locked(&mut state, line)
    }

    /// Like [`write_line`](Self::write_line), with the day read from `clock`
    /// while the lock is held.
    ///
    /// Once [`close_stale`](Self::close_stale) has closed a day, no line
    /// written through this method can reopen it as long as the clock does
    /// not go backwards. Returns the day the line was written under.
    pub fn write_line_now(&self, clock: &dyn Clock, line: &str) -> Result<DayKey> {
        let mut state = self.state.lock();
        let day = clock.today();
        self.open_locked(&mut state, day)?;
        Self::append_locked(&mut state, line)?;
        Ok(day)
    }

    /// Pushes buffered lines to the OS and syncs them to disk.
    ///
    /// Does nothing when no file is open.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some((_, writer)) = state.current.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Flushes, syncs and closes the current file, clearing the current day.
    ///
    /// Returns the path of the file that was closed, if one was open. The
    /// closed day is retired even when the final flush fails, so the file
    /// is still picked up for archiving.
    pub fn close(&self) -> Result<Option<PathBuf>> {
        let mut state = self.state.lock();
        let closed = Self::close_locked(&mut state)?;
        Ok(closed.map(|day| self.layout.path_for_day(day)))
    }

    /// Closes the current file if it belongs to a day before `today`.
    ///
    /// The check and the close happen under one lock, so a concurrent
    /// writer that already switched to `today` or later is left alone.
    pub fn close_stale(&self, today: DayKey) -> Result<Option<PathBuf>> {
        let mut state = self.state.lock();
        if state.current.as_ref().is_none_or(|(day, _)| *day >= today) {
            return Ok(None);
        }
        let closed = Self::close_locked(&mut state)?;
        Ok(closed.map(|day| self.layout.path_for_day(day)))
    }

    /// Returns the day of the open file.
    #[must_use]
    pub fn current_day(&self) -> Option<DayKey> {
        self.state.lock().current.as_ref().map(|(day, _)| *day)
    }

    /// Returns the path of the open file.
    #[must_use]
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current_day().map(|day| self.layout.path_for_day(day))
    }

    /// Drains the days whose files have been closed since the last call.
    pub fn take_retired(&self) -> Vec<DayKey> {
        std::mem::take(&mut self.state.lock().retired)
    }

    /// Puts drained days back for a later [`take_retired`](Self::take_retired).
    pub fn requeue_retired(&self, days: impl IntoIterator<Item = DayKey>) {
        let mut state = self.state.lock();
        for day in days {
            if !state.retired.contains(&day) {
                state.retired.push(day);
            }
        }
    }

    // ========== Internal Methods ==========

    fn open_locked(&self, state: &mut WriterState, day: DayKey) -> Result<()> {
        if matches!(&state.current, Some((open, _)) if *open == day) {
            return Ok(());
        }

        if let Err(e) = Self::close_locked(state) {
            warn!(error = %e, "failed to flush previous day file before switching");
        }

        fs::create_dir_all(&self.layout.dir)?;
        let path = self.layout.path_for_day(day);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), %day, "opened day file");

        state.current = Some((day, BufWriter::with_capacity(WRITE_BUFFER_BYTES, file)));
        Ok(())
    }

    fn append_locked(state: &mut WriterState, line: &str) -> Result<()> {
        let (_, writer) = state.current.as_mut().ok_or(LogError::NotOpen)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn close_locked(state: &mut WriterState) -> Result<Option<DayKey>> {
        let Some((day, mut writer)) = state.current.take() else {
            return Ok(None);
        };
        if !state.retired.contains(&day) {
            state.retired.push(day);
        }

        let synced = writer.flush().and_then(|()| writer.get_ref().sync_all());
        drop(writer);
        synced?;

        debug!(%day, "closed day file");
        Ok(Some(day))
    }
}

impl std::fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("layout", &self.layout)
            .field("current_day", &self.current_day())
            .finish_non_exhaustive()
    }
}
