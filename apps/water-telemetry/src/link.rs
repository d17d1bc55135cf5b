//! The device link: one physical resource, split into a single-consumer line reader and a
//! shareable writer. Reads and writes use separate OS handles so a command write never waits on a
//! pending read; writes are serialized against each other by the writer mutex.

use crate::config::Config;
use crate::decode::MAX_LINE_LEN;
use serialport::SerialPort;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open device link {target}: {reason}")]
    Open { target: String, reason: String },
    #[error("device link closed")]
    Closed,
    #[error("device link read failed: {0}")]
    Read(#[source] io::Error),
    #[error("device link write failed: {0}")]
    Write(#[source] io::Error),
}

/// Shared view of whether the link is still usable. Set by the ingest loop when it stops.
#[derive(Debug, Default)]
pub struct LinkHealth {
    failed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl LinkHealth {
    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.failed.store(true, Ordering::SeqCst);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(reason.into());
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }
}

pub struct LinkReader {
    reader: BufReader<Box<dyn Read + Send>>,
    buf: Vec<u8>,
    overflowed: bool,
}

/// Bytes of one line kept in memory. Anything past this is dropped up to the next newline and
/// the line is handed on long enough for the decoder to reject it.
const LINE_BUFFER_CAP: usize = MAX_LINE_LEN + 1;

impl LinkReader {
    /// Blocks until one full line is available. Read timeouts are not failures: the partial line
    /// stays buffered and the wait continues. EOF ends the link.
    pub fn read_line(&mut self) -> Result<String, LinkError> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(LinkError::Read(err)),
            };
            if available.is_empty() {
                if self.buf.is_empty() && !self.overflowed {
                    return Err(LinkError::Closed);
                }
                return Ok(self.take_line());
            }

            let newline = available.iter().position(|byte| *byte == b'\n');
            let end = newline.unwrap_or(available.len());
            let room = LINE_BUFFER_CAP - self.buf.len();
            if end > room {
                self.overflowed = true;
            }
            self.buf.extend_from_slice(&available[..end.min(room)]);
            let consumed = newline.map_or(end, |at| at + 1);
            self.reader.consume(consumed);

            if newline.is_some() {
                return Ok(self.take_line());
            }
        }
    }

    fn take_line(&mut self) -> String {
        let raw = String::from_utf8_lossy(&self.buf);
        let line = if self.overflowed {
            raw.into_owned()
        } else {
            raw.trim_end_matches(['\r', '\n']).to_string()
        };
        self.buf.clear();
        self.overflowed = false;
        line
    }
}

#[derive(Clone)]
pub struct LinkWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LinkWriter {
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| LinkError::Write(io::Error::other("link writer lock poisoned")))?;
        writer.write_all(bytes).map_err(LinkError::Write)?;
        writer.flush().map_err(LinkError::Write)
    }
}

pub fn from_io(
    reader: impl Read + Send + 'static,
    writer: impl Write + Send + 'static,
) -> (LinkReader, LinkWriter) {
    (
        LinkReader {
            reader: BufReader::new(Box::new(reader)),
            buf: Vec::new(),
            overflowed: false,
        },
        LinkWriter {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        },
    )
}

/// Opens the configured link: `tcp://host:port` for a network bridge, otherwise a serial device.
pub fn open(config: &Config) -> Result<(LinkReader, LinkWriter), LinkError> {
    let target = config.link.clone();
    let open_err = |reason: String| LinkError::Open {
        target: target.clone(),
        reason,
    };

    if let Some(addr) = config.link.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr).map_err(|err| open_err(err.to_string()))?;
        let writer = stream.try_clone().map_err(|err| open_err(err.to_string()))?;
        return Ok(from_io(stream, writer));
    }

    let port: Box<dyn SerialPort> = serialport::new(&config.link, config.baud_rate)
        .timeout(config.link_read_timeout)
        .open()
        .map_err(|err| open_err(err.to_string()))?;
    let writer = port.try_clone().map_err(|err| open_err(err.to_string()))?;
    Ok(from_io(port, writer))
}
