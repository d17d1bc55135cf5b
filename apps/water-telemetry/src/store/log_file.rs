use super::record::decode_record;
use super::StoreError;
use crate::channel::Channel;
use crate::sample::StoredRow;
use chrono::{DateTime, FixedOffset};
use crc32c::crc32c;
use std::fs;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOG_MAGIC: &[u8; 8] = b"WTLOG001";
const LOG_VERSION: u32 = 1;
pub(crate) const LOG_HEADER_LEN: u64 = 16;
const FRAME_HEADER_LEN: u64 = 8;
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Append handle for one channel's log file. Owned by the channel's writer mutex.
pub(crate) struct LogFile {
    path: PathBuf,
    file: fs::File,
    len: u64,
    pub(crate) next_seq: u64,
    sync_interval: Duration,
    last_sync_at: Instant,
}

/// Where one row's payload sits in its channel log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FramePos {
    pub(crate) offset: u64,
    pub(crate) len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub(crate) timestamp: DateTime<FixedOffset>,
    pub(crate) seq: u64,
    pub(crate) pos: FramePos,
}

/// What replay keeps in memory: one index entry per intact frame and the last row.
#[derive(Debug, Default)]
pub(crate) struct Replayed {
    pub(crate) entries: Vec<IndexEntry>,
    pub(crate) latest: Option<StoredRow>,
}

pub(crate) fn log_path(data_dir: &Path, channel: Channel) -> PathBuf {
    data_dir.join(format!("{}.log", channel.as_str().to_ascii_lowercase()))
}

/// Opens (or creates) the log for `channel` and indexes every intact frame.
///
/// A torn or corrupt tail left by a crash is truncated at the first bad frame.
pub(crate) fn open_log(
    data_dir: &Path,
    channel: Channel,
    sync_interval: Duration,
) -> Result<(LogFile, Replayed), StoreError> {
    let path = log_path(data_dir, channel);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|err| StoreError::io(&path, err))?;

    let existing = file.metadata().map_err(|err| StoreError::io(&path, err))?.len();
    let (replayed, valid_end) = if existing == 0 {
        write_log_header(&mut file, channel).map_err(|err| StoreError::io(&path, err))?;
        file.sync_data().ok();
        (Replayed::default(), LOG_HEADER_LEN)
    } else {
        check_log_header(&mut file, &path, channel)?;
        replay_frames(&mut file, channel).map_err(|err| StoreError::io(&path, err))?
    };

    let current = file.metadata().map_err(|err| StoreError::io(&path, err))?.len();
    if valid_end < current {
        tracing::warn!(
            path = %path.display(),
            kept_bytes = valid_end,
            dropped_bytes = current - valid_end,
            "truncating torn tail of channel log"
        );
        file.set_len(valid_end).map_err(|err| StoreError::io(&path, err))?;
    }
    file.seek(SeekFrom::End(0))
        .map_err(|err| StoreError::io(&path, err))?;

    let next_seq = replayed.latest.as_ref().map(|row| row.seq + 1).unwrap_or(1);
    Ok((
        LogFile {
            path,
            file,
            len: valid_end,
            next_seq,
            sync_interval,
            last_sync_at: Instant::now(),
        },
        replayed,
    ))
}

fn write_log_header(file: &mut fs::File, channel: Channel) -> io::Result<()> {
    let mut header = [0u8; LOG_HEADER_LEN as usize];
    header[0..8].copy_from_slice(LOG_MAGIC);
    header[8..12].copy_from_slice(&LOG_VERSION.to_le_bytes());
    header[12..16].copy_from_slice(&channel.tag().to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)
}

fn check_log_header(file: &mut fs::File, path: &Path, channel: Channel) -> Result<(), StoreError> {
    let mut header = [0u8; LOG_HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_exact(&mut header))
        .map_err(|_| StoreError::BadHeader {
            path: path.to_path_buf(),
            channel,
        })?;
    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    let tag = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
    if &header[0..8] != LOG_MAGIC || version != LOG_VERSION || Channel::from_tag(tag) != Some(channel)
    {
        return Err(StoreError::BadHeader {
            path: path.to_path_buf(),
            channel,
        });
    }
    Ok(())
}

fn replay_frames(file: &mut fs::File, channel: Channel) -> io::Result<(Replayed, u64)> {
    file.seek(SeekFrom::Start(LOG_HEADER_LEN))?;
    let mut reader = BufReader::new(&*file);
    let mut replayed = Replayed::default();
    let mut pos = LOG_HEADER_LEN;
    while let Some(payload) = read_next_frame_payload(&mut reader)? {
        let Some(row) = decode_record(channel, &payload) else {
            break;
        };
        if replayed.latest.as_ref().is_some_and(|prev| row.seq <= prev.seq) {
            break;
        }
        replayed.entries.push(IndexEntry {
            timestamp: row.timestamp(),
            seq: row.seq,
            pos: FramePos {
                offset: pos + FRAME_HEADER_LEN,
                len: payload.len() as u32,
            },
        });
        pos += FRAME_HEADER_LEN + payload.len() as u64;
        replayed.latest = Some(row);
    }
    Ok((replayed, pos))
}

fn read_next_frame_payload(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len == 0 || len > MAX_FRAME_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    if crc32c(&payload) != crc {
        return Ok(None);
    }
    Ok(Some(payload))
}

pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32c(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

impl LogFile {
    /// Writes one frame. On failure the file is cut back to its last good length so later
    /// frames are not stranded behind a partial one.
    pub(crate) fn append_frame(&mut self, payload: &[u8]) -> Result<FramePos, StoreError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(StoreError::RowTooLarge(payload.len()));
        }
        let frame = encode_frame(payload);
        if let Err(err) = self.file.write_all(&frame) {
            if let Err(rollback) = self
                .file
                .set_len(self.len)
                .and_then(|_| self.file.seek(SeekFrom::End(0)).map(|_| ()))
            {
                tracing::error!(path = %self.path.display(), error = %rollback, "failed to roll back partial frame");
            }
            return Err(StoreError::io(&self.path, err));
        }
        let pos = FramePos {
            offset: self.len + FRAME_HEADER_LEN,
            len: payload.len() as u32,
        };
        self.len += frame.len() as u64;

        if self.last_sync_at.elapsed() >= self.sync_interval {
            self.sync();
        }
        Ok(pos)
    }

    pub(crate) fn sync(&mut self) {
        if let Err(err) = self.file.sync_data() {
            tracing::warn!(path = %self.path.display(), error = %err, "channel log sync failed");
        }
        self.last_sync_at = Instant::now();
    }
}

/// Read handle for fetching indexed rows back from a channel log. Indexed frames are never
/// rewritten, so a reader needs no coordination with the writer.
pub(crate) struct LogReader {
    path: PathBuf,
    channel: Channel,
    reader: BufReader<fs::File>,
}

impl LogReader {
    pub(crate) fn open(path: &Path, channel: Channel) -> Result<Self, StoreError> {
        let file = fs::File::open(path).map_err(|err| StoreError::io(path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            channel,
            reader: BufReader::new(file),
        })
    }

    pub(crate) fn read_row(&mut self, pos: FramePos) -> Result<StoredRow, StoreError> {
        let corrupt = || StoreError::Corrupt {
            path: self.path.clone(),
            offset: pos.offset,
        };
        self.reader
            .seek(SeekFrom::Start(pos.offset - FRAME_HEADER_LEN))
            .map_err(|err| StoreError::io(&self.path, err))?;
        let payload = read_next_frame_payload(&mut self.reader)
            .map_err(|err| StoreError::io(&self.path, err))?
            .filter(|payload| payload.len() == pos.len as usize)
            .ok_or_else(corrupt)?;
        decode_record(self.channel, &payload).ok_or_else(corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::record::encode_record;
    use crate::test_support::{at, flow_sample};
    use tempfile::TempDir;

    fn flow_row(seq: u64, minute: u32) -> StoredRow {
        StoredRow {
            seq,
            sample: flow_sample(at(2026, 5, 1, 8, minute, 0), 1.5, 10.0 + seq as f64),
        }
    }

    #[test]
    fn replay_truncates_partial_frame_tail() {
        let dir = TempDir::new().unwrap();
        let (mut log, replayed) = open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap();
        assert!(replayed.entries.is_empty());

        let payload = encode_record(&flow_row(1, 0)).unwrap();
        log.append_frame(&payload).unwrap();
        drop(log);

        // A crash mid-write leaves a length prefix with no body.
        let path = log_path(dir.path(), Channel::Flow);
        let mut raw = fs::OpenOptions::new().append(true).open(&path).unwrap();
        raw.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
        drop(raw);

        let (log, replayed) = open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap();
        assert_eq!(replayed.entries.len(), 1);
        assert_eq!(replayed.latest, Some(flow_row(1, 0)));
        assert_eq!(log.next_seq, 2);
        let after = fs::metadata(&path).unwrap().len();
        assert_eq!(after, LOG_HEADER_LEN + FRAME_HEADER_LEN + payload.len() as u64);
    }

    #[test]
    fn replay_stops_at_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap();
        log.append_frame(&encode_record(&flow_row(1, 0)).unwrap()).unwrap();
        log.append_frame(&encode_record(&flow_row(2, 1)).unwrap()).unwrap();
        drop(log);

        let path = log_path(dir.path(), Channel::Flow);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let (_, replayed) = open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap();
        assert_eq!(replayed.entries.len(), 1);
        assert_eq!(replayed.latest, Some(flow_row(1, 0)));
    }

    #[test]
    fn reader_fetches_rows_at_replayed_positions() {
        let dir = TempDir::new().unwrap();
        let (mut log, _) = open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap();
        let written: Vec<FramePos> = (1..=3)
            .map(|seq| {
                log.append_frame(&encode_record(&flow_row(seq, seq as u32)).unwrap())
                    .unwrap()
            })
            .collect();
        drop(log);

        let (_, replayed) = open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap();
        let replayed_pos: Vec<FramePos> = replayed.entries.iter().map(|entry| entry.pos).collect();
        assert_eq!(replayed_pos, written);
        assert_eq!(replayed.entries[1].timestamp, at(2026, 5, 1, 8, 2, 0));

        let mut reader = LogReader::open(&log_path(dir.path(), Channel::Flow), Channel::Flow).unwrap();
        assert_eq!(reader.read_row(written[2]).unwrap(), flow_row(3, 3));
        assert_eq!(reader.read_row(written[0]).unwrap(), flow_row(1, 1));

        let skewed = FramePos {
            offset: written[1].offset + 1,
            len: written[1].len,
        };
        assert!(matches!(reader.read_row(skewed), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn log_of_another_channel_is_refused() {
        let dir = TempDir::new().unwrap();
        drop(open_log(dir.path(), Channel::Flow, Duration::from_secs(60)).unwrap());
        fs::rename(
            log_path(dir.path(), Channel::Flow),
            log_path(dir.path(), Channel::Borewell),
        )
        .unwrap();

        let err = open_log(dir.path(), Channel::Borewell, Duration::from_secs(60))
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::BadHeader { channel: Channel::Borewell, .. }));
    }
}
