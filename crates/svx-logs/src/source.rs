//! Line sources.
//!
//! A [`LineSource`] launches something that produces newline-delimited text
//! and hands back a [`RunningSource`]: a framed reader over its output plus a
//! handle that can be waited on or terminated. Restarting is the
//! supervisor's job, not the source's.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::warn;

use crate::error::{LogError, Result};

/// Longest line accepted from a source, excluding the line terminator.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Buffer size of the in-memory pipe used by [`ReplaySource`].
const REPLAY_PIPE_BYTES: usize = 64 * 1024;

/// Output reader of a running source.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Something that can be launched to produce a stream of lines.
///
/// `spawn` must be called from within a tokio runtime.
pub trait LineSource: Send + Sync {
    /// Human-readable description used in diagnostics.
    fn describe(&self) -> String;

    /// Launches the source.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Spawn`] if the source cannot be started.
    fn spawn(&self) -> Result<RunningSource>;
}

/// One frame produced by [`LineDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with its terminator removed.
    Line(String),
    /// A line longer than the limit was skipped.
    Oversized {
        /// Number of bytes that were discarded.
        bytes: usize,
    },
}

/// Splits a byte stream into lines.
///
/// Lines end at `\n`; a trailing `\r` is removed. Bytes that are not valid
/// UTF-8 are replaced rather than rejected. A line longer than the limit is
/// skipped up to its terminator and reported as [`Frame::Oversized`], after
/// which decoding continues with the next line.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    max_length: usize,
    next_index: usize,
    discarding: Option<usize>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    /// Creates a decoder accepting lines of at most `max_length` bytes.
    #[must_use]
    pub const fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }

    /// Returns the line length limit.
    #[must_use]
    pub const fn max_length(&self) -> usize {
        self.max_length
    }

    fn take_line(&self, buf: &mut BytesMut, len: usize, consumed: usize) -> Frame {
        let mut content_len = len;
        if content_len > 0 && buf[content_len - 1] == b'\r' {
            content_len -= 1;
        }

        let frame = if content_len > self.max_length {
            Frame::Oversized { bytes: content_len }
        } else {
            Frame::Line(String::from_utf8_lossy(&buf[..content_len]).into_owned())
        };
        buf.advance(consumed);
        frame
    }
}

impl Decoder for LineDecoder {
    type Item = Frame;
    type Error = LogError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let newline = buf[self.next_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| offset + self.next_index);

        match (self.discarding, newline) {
            (Some(dropped), Some(pos)) => {
                buf.advance(pos + 1);
                self.discarding = None;
                self.next_index = 0;
                Ok(Some(Frame::Oversized {
                    bytes: dropped + pos,
                }))
            }
            (Some(dropped), None) => {
                let len = buf.len();
                buf.advance(len);
                self.discarding = Some(dropped + len);
                self.next_index = 0;
                Ok(None)
            }
            (None, Some(pos)) => {
                self.next_index = 0;
                Ok(Some(self.take_line(buf, pos, pos + 1)))
            }
            (None, None) => {
                // One extra byte may be a `\r` belonging to a line at the limit.
                if buf.len() > self.max_length + 1 {
                    let len = buf.len();
                    buf.advance(len);
                    self.discarding = Some(len);
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if let Some(dropped) = self.discarding.take() {
            let len = buf.len();
            buf.advance(len);
            return Ok(Some(Frame::Oversized {
                bytes: dropped + len,
            }));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let len = buf.len();
        Ok(Some(self.take_line(buf, len, len)))
    }
}

/// How a source ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceExit {
    /// The process exited with this status.
    Exited(ExitStatus),
    /// A simulated source reached the end of its input.
    Finished,
    /// The source outlived the grace period and was killed.
    Killed,
    /// The exit status could not be collected.
    Unknown(String),
}

impl fmt::Display for SourceExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(status) => write!(f, "{status}"),
            Self::Finished => f.write_str("finished"),
            Self::Killed => f.write_str("killed"),
            Self::Unknown(reason) => write!(f, "unknown ({reason})"),
        }
    }
}

enum Handle {
    Child(Child),
    Task(JoinHandle<()>),
}

/// A launched source: framed output plus a handle to the producer.
pub struct RunningSource {
    lines: FramedRead<BoxedReader, LineDecoder>,
    handle: Handle,
}

impl RunningSource {
    /// Wraps a child process whose stdout was piped.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Stream`] if the child has no captured stdout.
    pub fn from_child(mut child: Child, max_line_bytes: usize) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LogError::Stream("child stdout was not captured".to_string()))?;
        Ok(Self {
            lines: FramedRead::new(Box::new(stdout), LineDecoder::new(max_line_bytes)),
            handle: Handle::Child(child),
        })
    }

    /// Wraps a producer task writing into `reader`'s other end.
    #[must_use]
    pub fn from_task(reader: BoxedReader, task: JoinHandle<()>, max_line_bytes: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LineDecoder::new(max_line_bytes)),
            handle: Handle::Task(task),
        }
    }

    /// Returns the OS process id, if the source is a process.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        match &self.handle {
            Handle::Child(child) => child.id(),
            Handle::Task(_) => None,
        }
    }

    /// Reads the next frame. Returns `None` at end of stream.
    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.lines.next().await
    }

    /// Closes the output and waits for the producer to end.
    ///
    /// The read end is dropped first so the producer can exit on its own. If
    /// it is still running after `grace`, it is killed.
    pub async fn terminate(self, grace: Duration) -> SourceExit {
        let Self { lines, handle } = self;
        drop(lines);

        match handle {
            Handle::Child(mut child) => match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => SourceExit::Exited(status),
                Ok(Err(e)) => SourceExit::Unknown(e.to_string()),
                Err(_) => match child.kill().await {
                    Ok(()) => SourceExit::Killed,
                    Err(e) => SourceExit::Unknown(e.to_string()),
                },
            },
            Handle::Task(mut task) => match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => SourceExit::Finished,
                Ok(Err(e)) => SourceExit::Unknown(e.to_string()),
                Err(_) => {
                    task.abort();
                    SourceExit::Killed
                }
            },
        }
    }
}

impl fmt::Debug for RunningSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningSource")
            .field("id", &self.id())
            .field("decoder", self.lines.decoder())
            .finish_non_exhaustive()
    }
}

/// A real subprocess whose stdout is captured. Its stderr is inherited.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    max_line_bytes: usize,
}

impl CommandSource {
    /// Creates a source running `program` with `args`.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Follows a systemd unit's journal with ISO timestamps.
    pub fn journal(unit: &str) -> Self {
        Self::new("journalctl", ["-u", unit, "-f", "-o", "short-iso"])
    }

    /// Overrides the line length limit.
    #[must_use]
    pub const fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the program arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl LineSource for CommandSource {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn(&self) -> Result<RunningSource> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LogError::Spawn {
                command: self.describe(),
                source,
            })?;
        RunningSource::from_child(child, self.max_line_bytes)
    }
}

/// Replays a text file line by line at a fixed interval, then ends.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    path: PathBuf,
    interval: Duration,
    max_line_bytes: usize,
}

impl ReplaySource {
    /// Creates a replay of `path`, pausing `interval` after each line.
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Overrides the line length limit.
    #[must_use]
    pub const fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Returns the replayed file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the pause between lines.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl LineSource for ReplaySource {
    fn describe(&self) -> String {
        format!("replay {}", self.path.display())
    }

    fn spawn(&self) -> Result<RunningSource> {
        let file = std::fs::File::open(&self.path).map_err(|source| LogError::Spawn {
            command: self.describe(),
            source,
        })?;
        let (reader, writer) = tokio::io::duplex(REPLAY_PIPE_BYTES);
        let task = tokio::spawn(replay(
            tokio::fs::File::from_std(file),
            writer,
            self.interval,
        ));
        Ok(RunningSource::from_task(
            Box::new(reader),
            task,
            self.max_line_bytes,
        ))
    }
}

async fn replay(file: tokio::fs::File, mut out: DuplexStream, interval: Duration) {
    let mut input = BufReader::new(file);
    let mut line = Vec::new();

    loop {
        line.clear();
        match input.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.last() != Some(&b'\n') {
                    line.push(b'\n');
                }
                // The reader is gone once the source is terminated.
                if out.write_all(&line).await.is_err() {
                    return;
                }
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "replay input unreadable");
                break;
            }
        }
    }
    let _ = out.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    fn decode_all(decoder: &mut LineDecoder, input: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf).expect("decode") {
            frames.push(frame);
        }
        while let Some(frame) = decoder.decode_eof(&mut buf).expect("decode eof") {
            frames.push(frame);
        }
        frames
    }

    fn line(s: &str) -> Frame {
        Frame::Line(s.to_string())
    }

    #[test_case(b"a\nb\n", &["a", "b"] ; "plain")]
    #[test_case(b"a\r\nb\r\n", &["a", "b"] ; "crlf")]
    #[test_case(b"a\n\nb", &["a", "", "b"] ; "empty line and unterminated tail")]
    #[test_case(b"", &[] ; "nothing")]
    fn decoder_splits_lines(input: &[u8], expected: &[&str]) {
        let mut decoder = LineDecoder::default();
        let frames = decode_all(&mut decoder, input);
        let expected: Vec<Frame> = expected.iter().map(|s| line(s)).collect();
        assert_eq!(frames, expected);
    }

    #[test]
    fn decoder_replaces_invalid_utf8() {
        let mut decoder = LineDecoder::default();
        let frames = decode_all(&mut decoder, b"caf\xff\n");
        assert_eq!(frames, vec![line("caf\u{fffd}")]);
    }

    #[test]
    fn decoder_skips_oversized_and_continues() {
        let mut decoder = LineDecoder::new(4);
        let frames = decode_all(&mut decoder, b"ok\n0123456789\nnext\n");
        assert_eq!(
            frames,
            vec![line("ok"), Frame::Oversized { bytes: 10 }, line("next")]
        );
    }

    #[test]
    fn decoder_accepts_line_at_limit_with_cr() {
        let mut decoder = LineDecoder::new(4);
        let frames = decode_all(&mut decoder, b"abcd\r\n");
        assert_eq!(frames, vec![line("abcd")]);
    }

    #[test]
    fn decoder_discards_across_chunks() {
        let mut decoder = LineDecoder::new(4);
        let mut buf = BytesMut::from(&b"0123456"[..]);
        assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"789\nok\n");
        assert_eq!(
            decoder.decode(&mut buf).expect("decode"),
            Some(Frame::Oversized { bytes: 10 })
        );
        assert_eq!(decoder.decode(&mut buf).expect("decode"), Some(line("ok")));
    }

    #[test]
    fn decoder_handles_partial_lines() {
        let mut decoder = LineDecoder::default();
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert_eq!(decoder.decode(&mut buf).expect("decode"), None);
        buf.extend_from_slice(b"lo\n");
        assert_eq!(decoder.decode(&mut buf).expect("decode"), Some(line("hello")));
    }

    #[test]
    fn decoder_accepts_one_mebibyte_line() {
        let mut decoder = LineDecoder::default();
        let mut input = vec![b'x'; MAX_LINE_BYTES];
        input.push(b'\n');
        let frames = decode_all(&mut decoder, &input);
        assert!(matches!(&frames[..], [Frame::Line(l)] if l.len() == MAX_LINE_BYTES));
    }

    #[test]
    fn journal_command_line() {
        let source = CommandSource::journal("svxlink.service");
        assert_eq!(source.program(), "journalctl");
        assert_eq!(
            source.describe(),
            "journalctl -u svxlink.service -f -o short-iso"
        );
    }

    #[tokio::test]
    async fn command_spawn_failure_is_spawn_error() {
        let source = CommandSource::new("/nonexistent/svxlogd-test-binary", Vec::<String>::new());
        let result = source.spawn();
        assert!(matches!(result, Err(LogError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_source_yields_lines_then_exit_status() {
        let source = CommandSource::new("sh", ["-c", "printf 'one\\r\\ntwo\\n'; exit 3"]);
        let mut running = source.spawn().expect("spawn");

        assert_eq!(running.next_frame().await.map(|f| f.expect("frame")), Some(line("one")));
        assert_eq!(running.next_frame().await.map(|f| f.expect("frame")), Some(line("two")));
        assert!(running.next_frame().await.is_none());

        match running.terminate(Duration::from_secs(5)).await {
            SourceExit::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected exit {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_kills_after_grace() {
        let source = CommandSource::new("sh", ["-c", "echo ready; exec sleep 30"]);
        let mut running = source.spawn().expect("spawn");
        assert_eq!(running.next_frame().await.map(|f| f.expect("frame")), Some(line("ready")));

        let exit = tokio::time::timeout(
            Duration::from_secs(10),
            running.terminate(Duration::from_millis(100)),
        )
        .await
        .expect("terminate in time");
        assert_eq!(exit, SourceExit::Killed);
    }

    #[tokio::test]
    async fn replay_source_replays_file_then_finishes() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("capture.txt");
        std::fs::write(&path, "first\nsecond\nthird").expect("seed");

        let source = ReplaySource::new(&path, Duration::ZERO);
        let mut running = source.spawn().expect("spawn");

        let mut lines = Vec::new();
        while let Some(frame) = running.next_frame().await {
            lines.push(frame.expect("frame"));
        }
        assert_eq!(lines, vec![line("first"), line("second"), line("third")]);
        assert_eq!(
            running.terminate(Duration::from_secs(1)).await,
            SourceExit::Finished
        );
    }

    #[tokio::test]
    async fn replay_missing_file_is_spawn_error() {
        let dir = TempDir::new().expect("create temp dir");
        let source = ReplaySource::new(dir.path().join("absent.txt"), Duration::ZERO);
        assert!(matches!(source.spawn(), Err(LogError::Spawn { .. })));
    }

    #[tokio::test]
    async fn replay_terminate_stops_slow_replay() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("capture.txt");
        std::fs::write(&path, "a\nb\nc\n").expect("seed");

        let source = ReplaySource::new(&path, Duration::from_secs(30));
        let mut running = source.spawn().expect("spawn");
        assert_eq!(running.next_frame().await.map(|f| f.expect("frame")), Some(line("a")));

        let exit = running.terminate(Duration::from_millis(50)).await;
        assert_eq!(exit, SourceExit::Killed);
    }
}
