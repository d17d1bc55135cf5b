use crate::decode::decode_line;
use crate::hub::FanoutHub;
use crate::link::{LinkError, LinkHealth, LinkReader};
use crate::sample::Sample;
use crate::store::ChannelStore;
use crate::time::{receipt_timestamp, Clock};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Idle,
    Reading,
    Decoding,
    Publishing,
    Persisting,
    LinkFailed,
}

impl IngestState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Reading,
            2 => Self::Decoding,
            3 => Self::Publishing,
            4 => Self::Persisting,
            5 => Self::LinkFailed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    state: AtomicU8,
    lines: AtomicU64,
    decoded: AtomicU64,
    rejected: AtomicU64,
    store_failures: AtomicU64,
    published: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub state: IngestState,
    pub lines: u64,
    pub decoded: u64,
    pub rejected: u64,
    pub store_failures: u64,
    pub published: u64,
    pub last_error: Option<String>,
}

impl IngestStats {
    pub fn state(&self) -> IngestState {
        IngestState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: IngestState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn record_error(&self, message: String) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(message);
        }
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            state: self.state(),
            lines: self.lines.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            last_error: self.last_error.lock().ok().and_then(|last| last.clone()),
        }
    }
}

/// The sole producer: reads device lines, publishes decoded samples live, then persists them.
pub struct IngestLoop {
    reader: LinkReader,
    store: Arc<ChannelStore>,
    hub: Arc<FanoutHub>,
    clock: Arc<dyn Clock>,
    stats: Arc<IngestStats>,
    health: Arc<LinkHealth>,
}

impl IngestLoop {
    pub fn new(
        reader: LinkReader,
        store: Arc<ChannelStore>,
        hub: Arc<FanoutHub>,
        clock: Arc<dyn Clock>,
        stats: Arc<IngestStats>,
        health: Arc<LinkHealth>,
    ) -> Self {
        Self {
            reader,
            store,
            hub,
            clock,
            stats,
            health,
        }
    }

    /// Runs until the link fails and returns that failure.
    pub fn run(mut self) -> LinkError {
        loop {
            self.stats.set_state(IngestState::Reading);
            let line = match self.reader.read_line() {
                Ok(line) => line,
                Err(err) => {
                    self.stats.set_state(IngestState::LinkFailed);
                    self.stats.record_error(err.to_string());
                    self.health.mark_failed(err.to_string());
                    tracing::error!(error = %err, "device link failed; ingestion stopped");
                    return err;
                }
            };
            self.process_line(&line);
        }
    }

    fn process_line(&self, line: &str) {
        self.stats.lines.fetch_add(1, Ordering::Relaxed);
        self.stats.set_state(IngestState::Decoding);
        let (channel, reading) = match decode_line(line) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, line = %line, "rejected device line");
                return;
            }
        };
        self.stats.decoded.fetch_add(1, Ordering::Relaxed);

        let sample = Sample {
            channel,
            timestamp: receipt_timestamp(self.clock.as_ref()),
            reading,
        };

        self.stats.set_state(IngestState::Publishing);
        let report = self.hub.publish(&sample);
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        if report.skipped > 0 || report.removed > 0 {
            tracing::debug!(
                channel = %channel,
                delivered = report.delivered,
                skipped = report.skipped,
                removed = report.removed,
                "live fan-out incomplete"
            );
        }

        self.stats.set_state(IngestState::Persisting);
        if let Err(err) = self.store.append(sample) {
            self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
            self.stats.record_error(err.to_string());
            tracing::error!(error = %err, channel = %channel, "failed to persist sample");
        }
    }
}

/// Starts the loop on its own OS thread. The receiver resolves with the link failure that ended it.
pub fn spawn_ingest_thread(ingest: IngestLoop) -> Result<oneshot::Receiver<LinkError>> {
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("link-reader".to_string())
        .spawn(move || {
            let err = ingest.run();
            let _ = done_tx.send(err);
        })
        .context("failed to spawn link reader thread")?;
    Ok(done_rx)
}

/// Waits for the reader thread to stop and logs why. Nothing else is torn down: stored data stays
/// queryable and commands report the dead link on each attempt.
pub async fn await_link_failure(done: oneshot::Receiver<LinkError>) -> Option<LinkError> {
    match done.await {
        Ok(err) => {
            tracing::error!(error = %err, "ingestion stopped; serving stored data only");
            Some(err)
        }
        Err(_) => {
            tracing::error!("link reader thread exited without reporting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::decode::MAX_LINE_LEN;
    use crate::link::from_io;
    use crate::test_support::{at, test_config, FixedClock};
    use serde_json::Value;
    use std::io::{self, Cursor};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<ChannelStore>,
        hub: Arc<FanoutHub>,
        stats: Arc<IngestStats>,
        health: Arc<LinkHealth>,
    }

    fn ingest(input: &str) -> (Harness, IngestLoop) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChannelStore::open(&test_config(dir.path())).unwrap());
        let hub = Arc::new(FanoutHub::new(16));
        let stats = Arc::new(IngestStats::default());
        let health = Arc::new(LinkHealth::default());
        let clock = Arc::new(FixedClock::new(at(2026, 7, 1, 9, 30, 0)));
        let (reader, _) = from_io(Cursor::new(input.as_bytes().to_vec()), io::sink());
        let ingest = IngestLoop::new(
            reader,
            store.clone(),
            hub.clone(),
            clock,
            stats.clone(),
            health.clone(),
        );
        (
            Harness {
                _dir: dir,
                store,
                hub,
                stats,
                health,
            },
            ingest,
        )
    }

    #[test]
    fn decoded_lines_reach_latest_rows() {
        let (harness, ingest) = ingest("1,MN,80,4000,A\n2,MF,60,3000,M\n3,12.5,500.0\n");
        let err = ingest.run();
        assert!(matches!(err, LinkError::Closed));

        let tank_a = harness.store.latest(Channel::TankA).unwrap().unwrap();
        assert_eq!(tank_a.tank().unwrap().percentage, 80);
        assert_eq!(tank_a.timestamp(), at(2026, 7, 1, 9, 30, 0));
        let tank_b = harness.store.latest(Channel::TankB).unwrap().unwrap();
        assert_eq!(tank_b.tank().unwrap().mode, "M");
        let flow = serde_json::to_value(harness.store.latest(Channel::Flow).unwrap().unwrap()).unwrap();
        assert_eq!(flow["actualFlow"], 12.5);

        let stats = harness.stats.snapshot();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.decoded, 3);
        assert_eq!(stats.rejected, 0);
        assert_eq!(stats.published, 3);
        assert_eq!(stats.state, IngestState::LinkFailed);
    }

    #[test]
    fn rejected_lines_are_counted_and_skipped() {
        let (harness, ingest) = ingest("garbage\n1,MN,150,4000,A\n\n4,ON\n");
        ingest.run();

        let stats = harness.stats.snapshot();
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.decoded, 1);
        assert_eq!(harness.store.row_count(Channel::TankA).unwrap(), 0);
        assert_eq!(harness.store.row_count(Channel::RainwaterInlet).unwrap(), 1);
    }

    #[test]
    fn observers_see_samples_before_link_failure() {
        let (harness, ingest) = ingest("5,OFF\n");
        let mut sub = harness.hub.subscribe();
        ingest.run();

        let event: Value = serde_json::from_str(&sub.events.try_recv().unwrap()).unwrap();
        assert_eq!(event["channel"], "Borewell");
        assert_eq!(event["status"], "OFF");
        assert!(harness.health.is_failed());
        assert_eq!(harness.health.last_error().as_deref(), Some("device link closed"));
    }

    #[tokio::test]
    async fn spawned_thread_reports_link_failure() {
        let (harness, ingest) = ingest("6,ON\n");
        let done = spawn_ingest_thread(ingest).unwrap();
        let err = await_link_failure(done).await;
        assert!(matches!(err, Some(LinkError::Closed)));
        assert_eq!(harness.store.row_count(Channel::RainwaterDrain).unwrap(), 1);
        assert!(harness.health.is_failed());
    }

    #[test]
    fn overlong_line_is_rejected_and_ingest_continues() {
        let input = format!("{}\n5,BN\n", "7".repeat(MAX_LINE_LEN * 3));
        let (harness, ingest) = ingest(&input);
        ingest.run();

        let stats = harness.stats.snapshot();
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(harness.store.row_count(Channel::Borewell).unwrap(), 1);
    }
}
