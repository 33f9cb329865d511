//! Supervised line capture with automatic restart.
//!
//! The [`Supervisor`] keeps a [`LineSource`] running until it is cancelled.
//! Each line it reads is forwarded in order on an `mpsc` channel. When the
//! source exits or its stream fails, the supervisor waits the restart delay
//! and launches it again, indefinitely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::source::{Frame, LineSource, RunningSource, SourceExit};

/// Shortest delay between relaunches, whatever the configured wait.
pub const MIN_RESTART_WAIT: Duration = Duration::from_millis(100);

/// Restart and termination timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay before relaunching after an exit or a failed launch.
    ///
    /// Raised to [`MIN_RESTART_WAIT`] when shorter.
    pub restart_wait: Duration,
    /// How long a stopped source may take to exit before it is killed.
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_wait: Duration::from_secs(3),
            kill_grace: Duration::from_secs(2),
        }
    }
}

impl SupervisorConfig {
    /// Creates a config with the given restart delay and kill grace.
    #[must_use]
    pub const fn new(restart_wait: Duration, kill_grace: Duration) -> Self {
        Self {
            restart_wait,
            kill_grace,
        }
    }
}

/// Events emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The source was launched.
    Started {
        /// Source description.
        source: String,
    },
    /// The source could not be launched.
    SpawnFailed {
        /// Launch error.
        error: String,
    },
    /// The source ended on its own or its stream failed.
    Exited {
        /// How the source ended.
        status: SourceExit,
    },
    /// A line over the length limit was discarded.
    LineTooLong {
        /// Discarded byte count.
        bytes: usize,
    },
    /// A relaunch is scheduled.
    Restarting {
        /// Relaunch number, starting at 1.
        attempt: u64,
        /// Delay before the relaunch.
        delay: Duration,
    },
    /// The supervisor was cancelled and the source is down.
    Stopped,
}

/// Counters kept by a running supervisor.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    restarts: AtomicU64,
    lines: AtomicU64,
}

impl SupervisorStats {
    /// Number of relaunches performed.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Number of lines forwarded.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

enum RunOutcome {
    Cancelled,
    Ended,
    ReceiverGone,
}

/// Keeps a line source running and forwards its lines.
pub struct Supervisor {
    source: Arc<dyn LineSource>,
    config: SupervisorConfig,
    stats: Arc<SupervisorStats>,
    events: Option<mpsc::Sender<SupervisorEvent>>,
}

impl Supervisor {
    /// Creates a supervisor for `source`.
    #[must_use]
    pub fn new(source: Arc<dyn LineSource>, config: SupervisorConfig) -> Self {
        Self {
            source,
            config,
            stats: Arc::new(SupervisorStats::default()),
            events: None,
        }
    }

    /// Publishes [`SupervisorEvent`]s on `events`.
    ///
    /// Events are dropped when the channel is full so a slow observer never
    /// holds up line capture.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<SupervisorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<SupervisorStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the supervisor on a new task.
    pub fn spawn(self, lines: mpsc::Sender<String>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(lines, cancel))
    }

    /// Runs until `cancel` fires or `lines` is closed.
    ///
    /// On return the source has been terminated and `lines` has been dropped,
    /// so the receiver sees the end of the stream after the last line.
    pub async fn run(self, lines: mpsc::Sender<String>, cancel: CancellationToken) {
        let description = self.source.describe();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.source.spawn() {
                Ok(mut running) => {
                    info!(source = %description, pid = ?running.id(), "line source started");
                    self.emit(SupervisorEvent::Started {
                        source: description.clone(),
                    });

                    let outcome = self.pump(&mut running, &lines, &cancel).await;
                    let status = running.terminate(self.config.kill_grace).await;

                    match outcome {
                        RunOutcome::Ended => {
                            warn!(source = %description, %status, "line source exited");
                            self.emit(SupervisorEvent::Exited { status });
                        }
                        RunOutcome::Cancelled => {
                            info!(source = %description, %status, "line source stopped");
                            break;
                        }
                        RunOutcome::ReceiverGone => {
                            debug!(source = %description, %status, "line receiver closed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(source = %description, error = %e, "failed to start line source");
                    self.emit(SupervisorEvent::SpawnFailed {
                        error: e.to_string(),
                    });
                }
            }

            let attempt = self.stats.restarts() + 1;
            let delay = self.config.restart_wait.max(MIN_RESTART_WAIT);
            info!(attempt, delay_ms = delay.as_millis() as u64, "restarting line source");
            self.emit(SupervisorEvent::Restarting { attempt, delay });

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            self.stats.restarts.fetch_add(1, Ordering::Relaxed);
        }

        self.emit(SupervisorEvent::Stopped);
        info!(
            source = %description,
            restarts = self.stats.restarts(),
            lines = self.stats.lines(),
            "supervisor stopped"
        );
    }

    async fn pump(
        &self,
        running: &mut RunningSource,
        lines: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => return RunOutcome::Cancelled,
                frame = running.next_frame() => frame,
            };

            match frame {
                Some(Ok(Frame::Line(line))) => {
                    // A line already read is always handed over, even during shutdown.
                    if lines.send(line).await.is_err() {
                        return RunOutcome::ReceiverGone;
                    }
                    self.stats.lines.fetch_add(1, Ordering::Relaxed);
                }
                Some(Ok(Frame::Oversized { bytes })) => {
                    warn!(bytes, "discarded oversized line");
                    self.emit(SupervisorEvent::LineTooLong { bytes });
                }
                Some(Err(e)) => {
                    warn!(error = %e, "line stream failed");
                    return RunOutcome::Ended;
                }
                None => return RunOutcome::Ended,
            }
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(events) = &self.events {
            let _ = events.try_send(event);
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("source", &self.source.describe())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
