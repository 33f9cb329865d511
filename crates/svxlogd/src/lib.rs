//! svxlogd - SvxLink log capture daemon
//!
//! This daemon follows the SvxLink (or SvxReflector) journal, writes every line
//! to one file per day, archives and prunes past days, and forwards node-info
//! announcements to an event sink.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{ConfigOverrides, DaemonConfig, DEFAULT_CONFIG_PATH};
pub use error::DaemonError;

/// Tracing filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "svxlogd=info,svx_logs=info";
