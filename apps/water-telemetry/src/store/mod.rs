//! Per-channel append-only storage.
//!
//! Each channel owns a log file (see [`log_file`]) plus an in-memory index rebuilt from it on
//! open. The index holds only `(timestamp, seq) -> frame position` and the latest row; row bodies
//! are read back from the log on demand. Appends to one channel are serialized by that channel's
//! writer mutex; appends to different channels never contend. A row enters the index only after
//! its frame is fully written, so readers see either the state before an append or after it.

mod log_file;
mod record;

use crate::channel::Channel;
use crate::config::Config;
use crate::sample::{Sample, StoredRow};
use chrono::{DateTime, FixedOffset};
use log_file::{FramePos, LogFile, LogReader, Replayed};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a {channel} log", path.display())]
    BadHeader { path: PathBuf, channel: Channel },
    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("encoded row is too large ({0} bytes)")]
    RowTooLarge(usize),
    #[error("unreadable frame at offset {offset} of {}", path.display())]
    Corrupt { path: PathBuf, offset: u64 },
    #[error("channel log lock poisoned")]
    Poisoned,
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Default)]
struct LogIndex {
    by_time: BTreeMap<(DateTime<FixedOffset>, u64), FramePos>,
    latest: Option<StoredRow>,
}

impl LogIndex {
    fn from_replay(replayed: Replayed) -> Self {
        let by_time = replayed
            .entries
            .into_iter()
            .map(|entry| ((entry.timestamp, entry.seq), entry.pos))
            .collect();
        Self {
            by_time,
            latest: replayed.latest,
        }
    }

    fn insert(&mut self, row: StoredRow, pos: FramePos) {
        self.by_time.insert((row.timestamp(), row.seq), pos);
        self.latest = Some(row);
    }
}

struct ChannelLog {
    channel: Channel,
    path: PathBuf,
    writer: Mutex<LogFile>,
    index: RwLock<LogIndex>,
}

impl ChannelLog {
    fn index(&self) -> Result<std::sync::RwLockReadGuard<'_, LogIndex>, StoreError> {
        self.index.read().map_err(|_| StoreError::Poisoned)
    }

    fn read_rows(&self, positions: impl IntoIterator<Item = FramePos>) -> Result<Vec<StoredRow>, StoreError> {
        let mut positions = positions.into_iter().peekable();
        if positions.peek().is_none() {
            return Ok(Vec::new());
        }
        let mut reader = LogReader::open(&self.path, self.channel)?;
        positions.map(|pos| reader.read_row(pos)).collect()
    }
}

pub struct ChannelStore {
    data_dir: PathBuf,
    logs: Vec<ChannelLog>,
}

impl ChannelStore {
    pub fn open(config: &Config) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir).map_err(|err| StoreError::io(&config.data_dir, err))?;

        let mut logs = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let (writer, replayed) =
                log_file::open_log(&config.data_dir, channel, config.sync_interval)?;
            tracing::info!(channel = %channel, rows = replayed.entries.len(), "channel log opened");
            logs.push(ChannelLog {
                channel,
                path: log_file::log_path(&config.data_dir, channel),
                writer: Mutex::new(writer),
                index: RwLock::new(LogIndex::from_replay(replayed)),
            });
        }

        Ok(Self {
            data_dir: config.data_dir.clone(),
            logs,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn log(&self, channel: Channel) -> &ChannelLog {
        &self.logs[channel.index()]
    }

    /// Durably appends `sample` to its channel's log and returns the stored row.
    pub fn append(&self, sample: Sample) -> Result<StoredRow, StoreError> {
        let log = self.log(sample.channel);
        let mut writer = log.writer.lock().map_err(|_| StoreError::Poisoned)?;

        let row = StoredRow {
            seq: writer.next_seq,
            sample,
        };
        let payload = record::encode_record(&row)?;
        let pos = writer.append_frame(&payload)?;
        writer.next_seq += 1;

        // Still holding the writer lock, so `latest` always moves forward in seq.
        let mut index = log.index.write().map_err(|_| StoreError::Poisoned)?;
        index.insert(row.clone(), pos);
        Ok(row)
    }

    /// Most recently appended row, by append order rather than timestamp.
    pub fn latest(&self, channel: Channel) -> Result<Option<StoredRow>, StoreError> {
        Ok(self.log(channel).index()?.latest.clone())
    }

    /// Rows with `from <= timestamp <= to`, in append order.
    pub fn scan(
        &self,
        channel: Channel,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let log = self.log(channel);
        let mut hits: Vec<(u64, FramePos)> = log
            .index()?
            .by_time
            .range((from, 0)..=(to, u64::MAX))
            .map(|((_, seq), pos)| (*seq, *pos))
            .collect();
        hits.sort_unstable_by_key(|(seq, _)| *seq);
        log.read_rows(hits.into_iter().map(|(_, pos)| pos))
    }

    /// Earliest row strictly after `after`, by timestamp.
    pub fn first_after(
        &self,
        channel: Channel,
        after: DateTime<FixedOffset>,
    ) -> Result<Option<StoredRow>, StoreError> {
        let log = self.log(channel);
        let next = log
            .index()?
            .by_time
            .range((Bound::Excluded((after, u64::MAX)), Bound::Unbounded))
            .next()
            .map(|(_, pos)| *pos);
        Ok(log.read_rows(next)?.pop())
    }

    pub fn row_count(&self, channel: Channel) -> Result<usize, StoreError> {
        Ok(self.log(channel).index()?.by_time.len())
    }

    /// Forces every channel log to disk. Called on shutdown.
    pub fn sync_all(&self) {
        for log in &self.logs {
            match log.writer.lock() {
                Ok(mut writer) => writer.sync(),
                Err(_) => tracing::warn!("skipping sync of poisoned channel log"),
            }
        }
    }
}
