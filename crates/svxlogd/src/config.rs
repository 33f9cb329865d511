//! Daemon configuration.
//!
//! Configuration for svxlogd, including:
//! - Output directory and file naming
//! - Flush, compression and retention settings
//! - The line source (journal unit, arbitrary command or file replay)
//! - Classifier overrides and the extracted-event sink
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use svx_logs::{
    Classifier, CommandSource, ControllerConfig, EventSink, JsonLinesEventSink, LineSource,
    LogLayout, NoopEventSink, ReplaySource, SupervisorConfig, TracingEventSink,
    DEFAULT_PATTERN, DEFAULT_REQUIRED_FIELDS,
};

use crate::error::DaemonError;

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/svxlogd/config.json";

/// Kind of line source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Follow a systemd unit with `journalctl`.
    #[default]
    Journal,
    /// Run an arbitrary program and capture its stdout.
    Command,
    /// Replay a text file at a fixed pace.
    Replay,
}

/// Line source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// Which source to run.
    pub kind: SourceKind,
    /// systemd unit followed by the journal source.
    pub unit: String,
    /// Program run by the command source.
    pub program: Option<String>,
    /// Arguments of the command source.
    pub args: Vec<String>,
    /// File replayed by the replay source.
    pub replay_path: Option<PathBuf>,
    /// Pause between replayed lines in milliseconds.
    pub replay_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Journal,
            unit: "svxlink.service".to_string(),
            program: None,
            args: Vec::new(),
            replay_path: None,
            replay_interval_ms: 1000,
        }
    }
}

/// Classifier overrides. Both fields empty means the built-in node-info pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Regular expression with named capture groups.
    pub pattern: Option<String>,
    /// Capture names that must all be present. Empty means the built-in list.
    pub required_fields: Vec<String>,
}

/// Kind of extracted-event sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Emit events as tracing records.
    #[default]
    Log,
    /// Append events as JSON lines to a file.
    Jsonl,
    /// Discard events.
    None,
}

/// Extracted-event sink settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Which sink to use.
    pub kind: SinkKind,
    /// Target file of the JSON-lines sink.
    pub path: Option<PathBuf>,
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding day files and archives.
    pub dir: PathBuf,
    /// File name prefix of day files.
    pub prefix: String,
    /// Extension of uncompressed day files.
    pub extension: String,
    /// Flush and rotation check period in seconds.
    pub flush_interval_secs: u64,
    /// Whether closed day files are gzip-archived.
    pub compress: bool,
    /// Number of archives kept; zero or less keeps all.
    pub keep: i64,
    /// Line source.
    pub source: SourceConfig,
    /// Delay before relaunching the source, in seconds.
    pub restart_wait_secs: u64,
    /// Grace period for a stopped source before it is killed, in milliseconds.
    pub kill_grace_ms: u64,
    /// Classifier overrides.
    pub classifier: ClassifierConfig,
    /// Extracted-event sink.
    pub events: EventsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/log/svxlink"),
            prefix: "log_svxlink_".to_string(),
            extension: "txt".to_string(),
            flush_interval_secs: 10,
            compress: true,
            keep: 14,
            source: SourceConfig::default(),
            restart_wait_secs: 3,
            kill_grace_ms: 2000,
            classifier: ClassifierConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Command-line values that replace individual config fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Replaces `dir`.
    pub dir: Option<PathBuf>,
    /// Replaces `prefix`.
    pub prefix: Option<String>,
    /// Replaces `flush_interval_secs`.
    pub flush_interval_secs: Option<u64>,
    /// Replaces `compress`.
    pub compress: Option<bool>,
    /// Replaces `keep`.
    pub keep: Option<i64>,
    /// Replaces `source.unit`.
    pub unit: Option<String>,
    /// Replaces `restart_wait_secs`.
    pub restart_wait_secs: Option<u64>,
}

impl DaemonConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content).map_err(|e| match e {
                DaemonError::Config(msg) => {
                    DaemonError::Config(format!("{}: {msg}", path.display()))
                }
                other => other,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DaemonError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))),
        }
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid.
    pub fn from_json(content: &str) -> Result<Self, DaemonError> {
        serde_json::from_str(content).map_err(|e| DaemonError::Config(format!("invalid JSON: {e}")))
    }

    /// Write configuration as pretty-printed JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DaemonError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DaemonError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }

    /// Replace fields with the values given on the command line.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.dir {
            self.dir.clone_from(dir);
        }
        if let Some(prefix) = &overrides.prefix {
            self.prefix.clone_from(prefix);
        }
        if let Some(secs) = overrides.flush_interval_secs {
            self.flush_interval_secs = secs;
        }
        if let Some(compress) = overrides.compress {
            self.compress = compress;
        }
        if let Some(keep) = overrides.keep {
            self.keep = keep;
        }
        if let Some(unit) = &overrides.unit {
            self.source.unit.clone_from(unit);
        }
        if let Some(secs) = overrides.restart_wait_secs {
            self.restart_wait_secs = secs;
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.prefix.is_empty() {
            return Err(DaemonError::Config("prefix cannot be empty".to_string()));
        }

        if self.prefix.contains(MAIN_SEPARATOR) || self.prefix.contains('/') {
            return Err(DaemonError::Config(
                "prefix cannot contain a path separator".to_string(),
            ));
        }

        if self.extension.is_empty() {
            return Err(DaemonError::Config("extension cannot be empty".to_string()));
        }

        if self.extension.contains(MAIN_SEPARATOR) || self.extension.contains('/') {
            return Err(DaemonError::Config(
                "extension cannot contain a path separator".to_string(),
            ));
        }

        if self.flush_interval_secs == 0 {
            return Err(DaemonError::Config(
                "flush_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.restart_wait_secs == 0 {
            return Err(DaemonError::Config(
                "restart_wait_secs must be greater than 0".to_string(),
            ));
        }

        match self.source.kind {
            SourceKind::Journal if self.source.unit.is_empty() => {
                return Err(DaemonError::Config(
                    "source.unit cannot be empty for a journal source".to_string(),
                ));
            }
            SourceKind::Command if self.source.program.as_deref().is_none_or(str::is_empty) => {
                return Err(DaemonError::Config(
                    "source.program is required for a command source".to_string(),
                ));
            }
            SourceKind::Replay if self.source.replay_path.is_none() => {
                return Err(DaemonError::Config(
                    "source.replay_path is required for a replay source".to_string(),
                ));
            }
            _ => {}
        }

        if self.events.kind == SinkKind::Jsonl && self.events.path.is_none() {
            return Err(DaemonError::Config(
                "events.path is required for a jsonl sink".to_string(),
            ));
        }

        self.build_classifier()?;
        Ok(())
    }

    /// Day file naming derived from this config.
    #[must_use]
    pub fn layout(&self) -> LogLayout {
        LogLayout::new(&self.dir)
            .with_prefix(&self.prefix)
            .with_extension(&self.extension)
    }

    /// Controller settings derived from this config.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            layout: self.layout(),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            compress: self.compress,
            keep: self.keep,
            supervisor: SupervisorConfig::new(
                Duration::from_secs(self.restart_wait_secs),
                Duration::from_millis(self.kill_grace_ms),
            ),
        }
    }

    /// Source kind that will actually run on this host.
    ///
    /// `journalctl` only exists on Linux; elsewhere a journal source falls
    /// back to replay when a replay file is configured.
    #[must_use]
    pub fn effective_source_kind(&self) -> SourceKind {
        if self.source.kind == SourceKind::Journal
            && !cfg!(target_os = "linux")
            && self.source.replay_path.is_some()
        {
            SourceKind::Replay
        } else {
            self.source.kind
        }
    }

    /// Builds the configured line source.
    #[must_use]
    pub fn build_source(&self) -> Arc<dyn LineSource> {
        let replay_path = self.source.replay_path.clone().unwrap_or_default();
        match self.effective_source_kind() {
            SourceKind::Journal => Arc::new(CommandSource::journal(&self.source.unit)),
            SourceKind::Command => Arc::new(CommandSource::new(
                self.source.program.clone().unwrap_or_default(),
                self.source.args.clone(),
            )),
            SourceKind::Replay => Arc::new(ReplaySource::new(
                replay_path,
                Duration::from_millis(self.source.replay_interval_ms),
            )),
        }
    }

    /// Builds the classifier, applying any overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile or lacks a required
    /// capture group.
    pub fn build_classifier(&self) -> Result<Classifier, DaemonError> {
        let overrides = &self.classifier;
        if overrides.pattern.is_none() && overrides.required_fields.is_empty() {
            return Ok(Classifier::new());
        }

        let pattern = overrides.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        let required: Vec<String> = if overrides.required_fields.is_empty() {
            DEFAULT_REQUIRED_FIELDS.iter().map(ToString::to_string).collect()
        } else {
            overrides.required_fields.clone()
        };
        Ok(Classifier::with_pattern(pattern, &required)?)
    }

    /// Builds the extracted-event sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON-lines file cannot be opened.
    pub fn build_sink(&self) -> Result<Arc<dyn EventSink>, DaemonError> {
        Ok(match self.events.kind {
            SinkKind::Log => Arc::new(TracingEventSink::new()),
            SinkKind::None => Arc::new(NoopEventSink),
            SinkKind::Jsonl => {
                let path = self.events.path.as_ref().ok_or_else(|| {
                    DaemonError::Config("events.path is required for a jsonl sink".to_string())
                })?;
                Arc::new(JsonLinesEventSink::open(path)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test]
    fn test_defaults_match_daemon_flags() {
        let config = DaemonConfig::default();
        assert_eq!(config.dir, PathBuf::from("/var/log/svxlink"));
        assert_eq!(config.prefix, "log_svxlink_");
        assert_eq!(config.extension, "txt");
        assert_eq!(config.flush_interval_secs, 10);
        assert!(config.compress);
        assert_eq!(config.keep, 14);
        assert_eq!(config.source.kind, SourceKind::Journal);
        assert_eq!(config.source.unit, "svxlink.service");
        assert_eq!(config.restart_wait_secs, 3);
        assert_eq!(config.kill_grace_ms, 2000);
        assert_eq!(config.events.kind, SinkKind::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config_fills_defaults() {
        let config = DaemonConfig::from_json(
            r#"{ "dir": "/srv/svx", "keep": 3, "source": { "unit": "svxreflector.service" } }"#,
        )
        .expect("should parse partial config");

        assert_eq!(config.dir, PathBuf::from("/srv/svx"));
        assert_eq!(config.keep, 3);
        assert_eq!(config.source.unit, "svxreflector.service");
        assert_eq!(config.source.kind, SourceKind::Journal);
        assert_eq!(config.prefix, "log_svxlink_");
        assert_eq!(config.flush_interval_secs, 10);
    }

    #[test]
    fn test_parse_empty_object() {
        let config = DaemonConfig::from_json("{}").expect("should parse");
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().expect("create temp dir");
        let config = DaemonConfig::load(dir.path().join("absent.json")).expect("load");
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ \"keep\": ").expect("write");

        let err = DaemonConfig::load(&path).expect_err("should fail");
        assert!(matches!(&err, DaemonError::Config(msg) if msg.contains("invalid JSON")));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("etc/svxlogd/config.json");
        let mut config = DaemonConfig::default();
        config.keep = 30;
        config.events = EventsConfig {
            kind: SinkKind::Jsonl,
            path: Some(PathBuf::from("/var/lib/svxlogd/nodes.jsonl")),
        };

        config.save(&path).expect("save");
        assert_eq!(DaemonConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = DaemonConfig::default();
        config.apply(&ConfigOverrides {
            dir: Some(PathBuf::from("/tmp/svx")),
            prefix: Some("reflector_".to_string()),
            flush_interval_secs: Some(2),
            compress: Some(false),
            keep: Some(-1),
            unit: Some("svxreflector.service".to_string()),
            restart_wait_secs: Some(9),
        });

        assert_eq!(config.dir, PathBuf::from("/tmp/svx"));
        assert_eq!(config.prefix, "reflector_");
        assert_eq!(config.flush_interval_secs, 2);
        assert!(!config.compress);
        assert_eq!(config.keep, -1);
        assert_eq!(config.source.unit, "svxreflector.service");
        assert_eq!(config.restart_wait_secs, 9);
    }

    #[test]
    fn test_empty_overrides_change_nothing() {
        let mut config = DaemonConfig::default();
        config.apply(&ConfigOverrides::default());
        assert_eq!(config, DaemonConfig::default());
    }

    #[test_case(r#"{ "prefix": "" }"#, "prefix cannot be empty" ; "empty prefix")]
    #[test_case(r#"{ "prefix": "logs/svx_" }"#, "path separator" ; "prefix with separator")]
    #[test_case(r#"{ "extension": "" }"#, "extension" ; "empty extension")]
    #[test_case(r#"{ "extension": "d/txt" }"#, "extension cannot contain" ; "extension with separator")]
    #[test_case(r#"{ "flush_interval_secs": 0 }"#, "flush_interval_secs" ; "zero flush")]
    #[test_case(r#"{ "restart_wait_secs": 0 }"#, "restart_wait_secs" ; "zero restart wait")]
    #[test_case(r#"{ "source": { "unit": "" } }"#, "source.unit" ; "empty unit")]
    #[test_case(r#"{ "source": { "kind": "command" } }"#, "source.program" ; "command without program")]
    #[test_case(r#"{ "source": { "kind": "replay" } }"#, "source.replay_path" ; "replay without path")]
    #[test_case(r#"{ "events": { "kind": "jsonl" } }"#, "events.path" ; "jsonl without path")]
    #[test_case(r#"{ "classifier": { "pattern": "(?P<callsign>" } }"#, "invalid pattern" ; "pattern does not compile")]
    #[test_case(r#"{ "classifier": { "pattern": "(?P<callsign>\\S+)" } }"#, "application" ; "pattern lacks default fields")]
    fn test_validate_rejects(json: &str, expected: &str) {
        let config = DaemonConfig::from_json(json).expect("should parse");
        let err = config.validate().expect_err("should be invalid");
        assert!(
            err.to_string().contains(expected),
            "`{err}` does not mention `{expected}`"
        );
    }

    #[test]
    fn test_negative_keep_is_valid() {
        let config = DaemonConfig::from_json(r#"{ "keep": -1 }"#).expect("should parse");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_controller_config_conversion() {
        let config = DaemonConfig::from_json(
            r#"{ "dir": "/srv/svx", "prefix": "p_", "extension": "log", "flush_interval_secs": 5, "restart_wait_secs": 1, "kill_grace_ms": 250 }"#,
        )
        .expect("should parse");
        let controller = config.controller_config();

        assert_eq!(controller.layout.dir, PathBuf::from("/srv/svx"));
        assert_eq!(controller.layout.archive_suffix(), ".log.gz");
        assert_eq!(controller.flush_interval, Duration::from_secs(5));
        assert_eq!(controller.supervisor.restart_wait, Duration::from_secs(1));
        assert_eq!(controller.supervisor.kill_grace, Duration::from_millis(250));
        assert_eq!(controller.keep, 14);
    }

    #[test]
    fn test_build_sources() {
        let mut config = DaemonConfig::default();
        config.source.unit = "svxreflector.service".to_string();
        if cfg!(target_os = "linux") {
            assert_eq!(
                config.build_source().describe(),
                "journalctl -u svxreflector.service -f -o short-iso"
            );
        }

        config.source.kind = SourceKind::Command;
        config.source.program = Some("tail".to_string());
        config.source.args = vec!["-F".to_string(), "/var/log/svxlink.log".to_string()];
        assert_eq!(config.build_source().describe(), "tail -F /var/log/svxlink.log");

        config.source.kind = SourceKind::Replay;
        config.source.replay_path = Some(PathBuf::from("capture.txt"));
        assert_eq!(config.build_source().describe(), "replay capture.txt");
    }

    #[test]
    fn test_journal_falls_back_to_replay_off_linux() {
        let mut config = DaemonConfig::default();
        assert_eq!(config.effective_source_kind(), SourceKind::Journal);

        config.source.replay_path = Some(PathBuf::from("capture.txt"));
        let expected = if cfg!(target_os = "linux") {
            SourceKind::Journal
        } else {
            SourceKind::Replay
        };
        assert_eq!(config.effective_source_kind(), expected);
    }

    #[test]
    fn test_build_classifier_with_custom_fields() {
        let config = DaemonConfig::from_json(
            r#"{ "classifier": { "pattern": "Talker start on TG #(?P<tg>\\d+): (?P<callsign>\\S+)", "required_fields": ["tg", "callsign"] } }"#,
        )
        .expect("should parse");
        let classifier = config.build_classifier().expect("valid classifier");

        let event = classifier
            .classify("ReflectorLogic: Talker start on TG #240: SM0XYZ")
            .expect("classify")
            .expect("event");
        assert_eq!(event.get("tg"), Some("240"));
    }

    #[test]
    fn test_build_jsonl_sink() {
        let dir = TempDir::new().expect("create temp dir");
        let mut config = DaemonConfig::default();
        config.events = EventsConfig {
            kind: SinkKind::Jsonl,
            path: Some(dir.path().join("events/nodes.jsonl")),
        };

        assert!(config.build_sink().is_ok());
        assert!(dir.path().join("events/nodes.jsonl").exists());
    }
}
