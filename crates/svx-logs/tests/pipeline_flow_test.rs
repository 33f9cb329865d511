//! End-to-end capture flow tests.
//!
//! These drive a full [`Controller`] against a replayed capture:
//! 1. Lines flow from the supervised source into the day file
//! 2. Matching lines reach the event sink
//! 3. A day change archives the previous day
//! 4. Shutdown flushes everything already read

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use svx_logs::{
    Clock, Controller, ControllerConfig, ControllerState, DayKey, EventSink, ExtractedEvent,
    JsonLinesEventSink, LineSource, LogLayout, ManualClock, ReplaySource, SupervisorConfig,
    SupervisorEvent,
};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const NODE_INFO: &str =
    "F4ABC-L: NodeInfo app=SvxLink platform=RaspberryPi device=rpi4 os=Debian-12 version=24.02";

fn day(y: i32, m: u32, d: u32) -> DayKey {
    DayKey::from_ymd(y, m, d).expect("valid date")
}

fn gunzip(path: &Path) -> String {
    let mut out = String::new();
    GzDecoder::new(fs::File::open(path).expect("open archive"))
        .read_to_string(&mut out)
        .expect("decompress");
    out
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(15), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

struct Harness {
    _dir: TempDir,
    layout: LogLayout,
    events_path: std::path::PathBuf,
    clock: Arc<ManualClock>,
    controller: Arc<Controller>,
    stop: Option<oneshot::Sender<()>>,
    runner: tokio::task::JoinHandle<svx_logs::Result<()>>,
}

impl Harness {
    fn start(
        capture: &str,
        flush_interval: Duration,
        supervisor: SupervisorConfig,
    ) -> (Self, mpsc::Receiver<SupervisorEvent>) {
        let dir = TempDir::new().expect("create temp dir");
        let capture_path = dir.path().join("capture.txt");
        fs::write(&capture_path, capture).expect("seed capture");

        let layout = LogLayout::new(dir.path().join("logs")).with_prefix("log_svxlink_");
        fs::create_dir_all(&layout.dir).expect("create log dir");
        let events_path = dir.path().join("events.jsonl");
        let sink = JsonLinesEventSink::open(&events_path).expect("open sink");

        let clock = Arc::new(ManualClock::new(day(2024, 1, 1)));
        let (event_tx, event_rx) = mpsc::channel(256);
        let controller = Arc::new(
            Controller::new(ControllerConfig {
                layout: layout.clone(),
                flush_interval,
                compress: true,
                keep: 14,
                supervisor,
            })
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .with_sink(Arc::new(sink) as Arc<dyn EventSink>)
            .with_supervisor_events(event_tx),
        );

        let source: Arc<dyn LineSource> =
            Arc::new(ReplaySource::new(&capture_path, Duration::ZERO));
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let runner = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .run(source, async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        (
            Self {
                _dir: dir,
                layout,
                events_path,
                clock,
                controller,
                stop: Some(stop_tx),
                runner,
            },
            event_rx,
        )
    }

    async fn shutdown(mut self) -> Self {
        if let Some(stop) = self.stop.take() {
            stop.send(()).expect("signal shutdown");
        }
        (&mut self.runner).await.expect("join").expect("run");
        self
    }

    fn read_day(&self, day: DayKey) -> String {
        fs::read_to_string(self.layout.path_for_day(day)).unwrap_or_default()
    }

    fn events(&self) -> Vec<ExtractedEvent> {
        fs::read_to_string(&self.events_path)
            .expect("read events")
            .lines()
            .map(|l| serde_json::from_str(l).expect("event json"))
            .collect()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restarts_and_midnight_lose_and_repeat_nothing() {
    let pattern = ["first", NODE_INFO, "third"];
    let (harness, _events) = Harness::start(
        &format!("{}\n", pattern.join("\n")),
        Duration::from_millis(50),
        SupervisorConfig::new(Duration::from_millis(20), Duration::from_millis(200)),
    );

    wait_until("a few replays on day one", || {
        harness.read_day(day(2024, 1, 1)).lines().count() >= 9
    })
    .await;

    harness.clock.set(day(2024, 1, 2));
    let archive = harness.layout.archive_for_day(day(2024, 1, 1));
    wait_until("day one archived", || archive.exists()).await;
    wait_until("lines on day two", || !harness.read_day(day(2024, 1, 2)).is_empty()).await;

    let harness = harness.shutdown().await;
    assert_eq!(harness.controller.state(), ControllerState::Stopped);

    let day_one = gunzip(&archive);
    let day_two = harness.read_day(day(2024, 1, 2));
    assert!(!harness.layout.path_for_day(day(2024, 1, 1)).exists());

    let all: Vec<&str> = day_one.lines().chain(day_two.lines()).collect();
    assert!(all.len() >= 10);
    for (i, line) in all.iter().enumerate() {
        assert_eq!(*line, pattern[i % pattern.len()], "line {i} out of sequence");
    }

    let persisted_matches = all.iter().filter(|l| **l == NODE_INFO).count();
    let events = harness.events();
    assert_eq!(events.len(), persisted_matches);
    assert!(events.iter().all(|e| e.get("callsign") == Some("F4ABC-L")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_flushes_lines_read_before_it() {
    let (harness, mut events) = Harness::start(
        "one\ntwo\nthree\nfour\nfive\n",
        Duration::from_secs(3600),
        SupervisorConfig::new(Duration::from_secs(3600), Duration::from_millis(200)),
    );

    timeout(Duration::from_secs(15), async {
        while let Some(event) = events.recv().await {
            if matches!(event, SupervisorEvent::Exited { .. }) {
                break;
            }
        }
    })
    .await
    .expect("replay finished");

    let harness = harness.shutdown().await;

    assert_eq!(harness.read_day(day(2024, 1, 1)), "one\ntwo\nthree\nfour\nfive\n");
    assert!(harness.controller.writer().current_day().is_none());
    assert!(harness.events().is_empty());
}
