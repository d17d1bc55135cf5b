use crate::channel::Channel;
use crate::config::Config;
use crate::dispatch::CommandDispatcher;
use crate::hub::FanoutHub;
use crate::ingest::IngestStats;
use crate::link::{from_io, LinkHealth};
use crate::query::QueryEngine;
use crate::sample::{FlowReading, Reading, Sample, StatusReading, TankReading};
use crate::state::AppState;
use crate::store::ChannelStore;
use crate::time::Clock;
use chrono::{DateTime, FixedOffset, TimeZone};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Clock pinned to a settable instant.
pub struct FixedClock(Mutex<DateTime<FixedOffset>>);

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.0.lock().unwrap()
    }
}

pub fn test_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
    test_offset()
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap()
}

pub fn test_config(data_dir: &Path) -> Config {
    Config {
        link: "tcp://127.0.0.1:0".to_string(),
        baud_rate: 9600,
        link_read_timeout: Duration::from_millis(100),
        http_bind: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_path_buf(),
        sync_interval: Duration::from_secs(3600),
        observer_queue: 16,
        utc_offset: test_offset(),
    }
}

pub fn tank_sample(
    channel: Channel,
    timestamp: DateTime<FixedOffset>,
    percentage: u8,
    liters: u64,
) -> Sample {
    Sample {
        channel,
        timestamp,
        reading: Reading::Tank(TankReading {
            motor_status: "MN".to_string(),
            percentage,
            liters,
            mode: "A".to_string(),
        }),
    }
}

pub fn flow_sample(timestamp: DateTime<FixedOffset>, actual_flow: f64, total_flow: f64) -> Sample {
    Sample {
        channel: Channel::Flow,
        timestamp,
        reading: Reading::Flow(FlowReading {
            actual_flow,
            total_flow,
        }),
    }
}

pub fn status_sample(
    channel: Channel,
    timestamp: DateTime<FixedOffset>,
    status: &str,
    mode: Option<&str>,
) -> Sample {
    Sample {
        channel,
        timestamp,
        reading: Reading::Status(StatusReading {
            status: status.to_string(),
            mode: mode.map(str::to_string),
        }),
    }
}

/// Link writer that keeps everything written to it.
#[derive(Clone, Default)]
pub struct RecordingWriter(pub Arc<Mutex<Vec<u8>>>);

impl RecordingWriter {
    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct TestApp {
    _dir: TempDir,
    pub state: AppState,
    pub store: Arc<ChannelStore>,
    pub clock: Arc<FixedClock>,
    pub link: RecordingWriter,
}

/// Full application state over a temp store, a recording link and a clock pinned to
/// 2026-07-01 12:00 local.
pub fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let store = Arc::new(ChannelStore::open(&config).unwrap());
    let clock = Arc::new(FixedClock::new(at(2026, 7, 1, 12, 0, 0)));
    let link = RecordingWriter::default();
    let (_, writer) = from_io(io::empty(), link.clone());
    let health = Arc::new(LinkHealth::default());
    let state = AppState {
        hub: Arc::new(FanoutHub::new(config.observer_queue)),
        engine: QueryEngine::new(store.clone()),
        dispatcher: CommandDispatcher::new(writer, health.clone()),
        clock: clock.clone(),
        stats: Arc::new(IngestStats::default()),
        health,
        config,
    };
    TestApp {
        _dir: dir,
        state,
        store,
        clock,
        link,
    }
}
