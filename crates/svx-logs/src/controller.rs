//! The capture controller.
//!
//! Wires a supervised [`LineSource`] into the [`RotatingWriter`] and the
//! [`Classifier`], and drives periodic flushing, day rotation, archiving and
//! retention from a timer until shutdown is requested.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{compress_file, compress_stale};
use crate::classifier::Classifier;
use crate::clock::{Clock, SystemClock};
use crate::error::{LogError, Result};
use crate::retention::prune;
use crate::sink::{EventSink, TracingEventSink};
use crate::source::LineSource;
use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorEvent};
use crate::types::{DayKey, LogLayout};
use crate::writer::RotatingWriter;

/// Capacity of the channel between the supervisor and the ingest task.
pub const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Startup housekeeping is running; nothing is captured yet.
    Starting,
    /// Capturing lines and ticking.
    Running,
    /// Shutdown was requested; draining and closing.
    ShuttingDown,
    /// Terminal.
    Stopped,
}

/// Atomic wrapper for controller state.
#[derive(Debug)]
pub struct AtomicControllerState(AtomicU32);

impl AtomicControllerState {
    /// Create a new atomic state.
    #[must_use]
    pub const fn new(state: ControllerState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ControllerState {
        match self.0.load(Ordering::SeqCst) {
            0 => ControllerState::Starting,
            1 => ControllerState::Running,
            2 => ControllerState::ShuttingDown,
            _ => ControllerState::Stopped,
        }
    }

    /// Store a new state.
    pub fn store(&self, state: ControllerState) {
        self.0.store(state as u32, Ordering::SeqCst);
    }
}

/// Settings fixed for the lifetime of a controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Where and how day files are named.
    pub layout: LogLayout,
    /// Period of the flush and rotation tick.
    pub flush_interval: Duration,
    /// Whether closed day files are gzip-archived.
    pub compress: bool,
    /// Number of archives to keep; zero or less keeps all.
    pub keep: i64,
    /// Restart and kill timing of the line source.
    pub supervisor: SupervisorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            layout: LogLayout::default(),
            flush_interval: Duration::from_secs(10),
            compress: true,
            keep: 14,
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Per-line path shared by the controller and its ingest task.
#[derive(Clone)]
struct Pipeline {
    writer: Arc<RotatingWriter>,
    classifier: Arc<Classifier>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    fn ingest(&self, line: &str) {
        if let Err(e) = self.writer.write_line_now(self.clock.as_ref(), line) {
            error!(error = %e, "failed to write log line");
        }

        match self.classifier.classify(line) {
            Ok(Some(event)) => {
                if let Err(e) = self.sink.deliver(&event) {
                    warn!(error = %e, "failed to deliver extracted event");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "matched line dropped"),
        }
    }
}

/// Runs the capture pipeline.
pub struct Controller {
    config: ControllerConfig,
    pipeline: Pipeline,
    state: Arc<AtomicControllerState>,
    supervisor_events: Option<mpsc::Sender<SupervisorEvent>>,
}

impl Controller {
    /// Creates a controller with the built-in classifier, a tracing sink and
    /// the system clock.
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        let writer = Arc::new(RotatingWriter::new(config.layout.clone()));
        Self {
            config,
            pipeline: Pipeline {
                writer,
                classifier: Arc::new(Classifier::new()),
                sink: Arc::new(TracingEventSink::new()),
                clock: Arc::new(SystemClock),
            },
            state: Arc::new(AtomicControllerState::new(ControllerState::Starting)),
            supervisor_events: None,
        }
    }

    /// Replaces the classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.pipeline.classifier = Arc::new(classifier);
        self
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.pipeline.sink = sink;
        self
    }

    /// Replaces the clock that decides the current day.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.pipeline.clock = clock;
        self
    }

    /// Forwards supervisor events to `events`.
    #[must_use]
    pub fn with_supervisor_events(mut self, events: mpsc::Sender<SupervisorEvent>) -> Self {
        self.supervisor_events = Some(events);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state.load()
    }

    /// Returns a shared handle to the state, for observers.
    #[must_use]
    pub fn state_handle(&self) -> Arc<AtomicControllerState> {
        Arc::clone(&self.state)
    }

    /// Returns the writer.
    #[must_use]
    pub fn writer(&self) -> &Arc<RotatingWriter> {
        &self.pipeline.writer
    }

    /// Persists one line under today's file and classifies it.
    ///
    /// Failures are logged; the next line is processed normally.
    pub fn ingest_line(&self, line: &str) {
        self.pipeline.ingest(line);
    }

    /// Archives day files left over from earlier runs and applies retention.
    pub async fn startup(&self) {
        let layout = self.config.layout.clone();
        let today = self.pipeline.clock.today();
        let compress = self.config.compress;
        let keep = self.config.keep;

        let result = tokio::task::spawn_blocking(move || {
            if compress {
                if let Err(e) = compress_stale(&layout, today) {
                    warn!(error = %e, "stale file sweep failed");
                }
            }
            apply_retention(&layout, keep);
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "startup housekeeping task failed");
        }
    }

    /// One timer tick: flush, close a past day, archive it and prune.
    ///
    /// All file work runs on the blocking pool.
    pub async fn tick(&self) {
        let writer = Arc::clone(&self.pipeline.writer);
        let clock = Arc::clone(&self.pipeline.clock);
        let layout = self.config.layout.clone();
        let compress = self.config.compress;
        let keep = self.config.keep;

        let result = tokio::task::spawn_blocking(move || {
            rotate(&writer, clock.as_ref(), &layout, compress, keep);
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "rotation housekeeping task failed");
        }
    }

    /// Runs until `shutdown` completes.
    ///
    /// Lines already read from the source when shutdown begins are still
    /// written. The writer is flushed and closed before this returns.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush and close, if any.
    pub async fn run<F>(&self, source: Arc<dyn LineSource>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.state.store(ControllerState::Starting);
        self.startup().await;

        let cancel = CancellationToken::new();
        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);

        let mut supervisor = Supervisor::new(source, self.config.supervisor.clone());
        if let Some(events) = &self.supervisor_events {
            supervisor = supervisor.with_events(events.clone());
        }
        let stats = supervisor.stats();
        let supervisor = supervisor.spawn(line_tx, cancel.clone());

        let pipeline = self.pipeline.clone();
        let ingest = tokio::task::spawn_blocking(move || {
            while let Some(line) = line_rx.blocking_recv() {
                pipeline.ingest(&line);
            }
        });

        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        self.state.store(ControllerState::Running);
        info!(
            dir = %self.config.layout.dir.display(),
            flush_secs = self.config.flush_interval.as_secs_f64(),
            "capture running"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.state.store(ControllerState::ShuttingDown);
        info!("shutting down");
        cancel.cancel();

        if let Err(e) = supervisor.await {
            error!(error = %e, "supervisor task failed");
        }
        if let Err(e) = ingest.await {
            error!(error = %e, "ingest task failed");
        }

        let writer = Arc::clone(&self.pipeline.writer);
        let result = match tokio::task::spawn_blocking(move || finish(&writer)).await {
            Ok(result) => result,
            Err(e) => Err(LogError::Io(std::io::Error::other(e))),
        };
        self.state.store(ControllerState::Stopped);
        info!(
            lines = stats.lines(),
            restarts = stats.restarts(),
            "capture stopped"
        );
        result
    }

}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

fn finish(writer: &RotatingWriter) -> Result<()> {
    writer.flush()?;
    if let Some(path) = writer.close()? {
        info!(path = %path.display(), "closed log file");
    }
    Ok(())
}

fn rotate(
    writer: &RotatingWriter,
    clock: &dyn Clock,
    layout: &LogLayout,
    compress: bool,
    keep: i64,
) {
    if let Err(e) = writer.flush() {
        error!(error = %e, "failed to flush log file");
    }

    let today = clock.today();
    match writer.close_stale(today) {
        Ok(Some(path)) => info!(path = %path.display(), "closed log file for past day"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "failed to close log file"),
    }

    let retired = writer.take_retired();
    if retired.is_empty() {
        return;
    }
    debug!(?retired, %today, "rotating");

    if compress {
        // A day retired by ingestion after `today` was read is not past yet.
        let open = writer.current_day();
        let (ready, pending): (Vec<DayKey>, Vec<DayKey>) = retired
            .into_iter()
            .partition(|day| *day < today && Some(*day) != open);
        if !pending.is_empty() {
            debug!(?pending, "deferring archive to a later tick");
            writer.requeue_retired(pending);
        }
        if ready.is_empty() {
            return;
        }
        archive_retired(layout, &ready, today);
    }
    apply_retention(layout, keep);
}

fn archive_retired(layout: &LogLayout, retired: &[DayKey], today: DayKey) {
    for day in retired {
        let path = layout.path_for_day(*day);
        if !path.exists() {
            continue;
        }
        match compress_file(&path) {
            Ok(archive) => info!(%day, archive = %archive.display(), "compressed log file"),
            Err(LogError::OriginalNotRemoved { archive, source }) => warn!(
                %day,
                archive = %archive.display(),
                error = %source,
                "compressed log file but failed removing original"
            ),
            Err(e) => error!(%day, error = %e, "failed to compress log file"),
        }
    }

    if let Err(e) = compress_stale(layout, today) {
        warn!(error = %e, "stale file sweep failed");
    }
}

fn apply_retention(layout: &LogLayout, keep: i64) {
    match prune(&layout.dir, &layout.prefix, &layout.archive_suffix(), keep) {
        Ok(report) if report.is_noop() => {}
        Ok(report) => info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            "retention applied"
        ),
        Err(e) => warn!(error = %e, "failed to apply retention"),
    }
}
