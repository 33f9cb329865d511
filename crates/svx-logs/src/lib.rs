//! # svx-logs
//!
//! Capture pipeline for SvxLink and SvxReflector logs.
//!
//! This crate provides:
//!
//! - [`Supervisor`] - Keeps a [`LineSource`] running and forwards its lines
//! - [`CommandSource`] / [`ReplaySource`] - Subprocess and file-replay sources
//! - [`RotatingWriter`] - Buffered, day-keyed append-only log files
//! - [`compress_file`] / [`compress_stale`] - Gzip archiving of closed days
//! - [`prune`] - Count-based retention over archives
//! - [`Classifier`] - Named-field extraction from matching lines
//! - [`EventSink`] - Destinations for extracted events
//! - [`Controller`] - Ties the above together with a flush/rotation timer
//!
//! ## Example
//!
//! ```rust
//! use svx_logs::{Classifier, DayKey, LogLayout};
//!
//! let layout = LogLayout::new("/var/log/svxlink").with_prefix("log_svxlink_");
//! let day: DayKey = "2024-01-01".parse().unwrap();
//! assert!(layout.path_for_day(day).ends_with("log_svxlink_2024-01-01.txt"));
//!
//! let classifier = Classifier::new();
//! let event = classifier
//!     .classify("F4ABC: NodeInfo app=SvxLink platform=rpi device=pi4 os=Debian version=24.02")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(event.get("callsign"), Some("F4ABC"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod classifier;
pub mod clock;
pub mod controller;
pub mod error;
pub mod retention;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod types;
pub mod writer;

// Re-export main types
pub use archive::{compress_file, compress_stale};
pub use classifier::{Classifier, DEFAULT_PATTERN, DEFAULT_REQUIRED_FIELDS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{AtomicControllerState, Controller, ControllerConfig, ControllerState};
pub use error::{LogError, Result};
pub use retention::{prune, PruneReport};
pub use sink::{BoxedEventSink, EventSink, JsonLinesEventSink, NoopEventSink, TracingEventSink};
pub use source::{
    CommandSource, Frame, LineDecoder, LineSource, ReplaySource, RunningSource, SourceExit,
    MAX_LINE_BYTES,
};
pub use supervisor::{
    Supervisor, SupervisorConfig, SupervisorEvent, SupervisorStats, MIN_RESTART_WAIT,
};
pub use types::{DayKey, ExtractedEvent, LogLayout};
pub use writer::RotatingWriter;
