use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, Local, Offset};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;

#[derive(Debug, Clone)]
pub struct Config {
    /// Serial device path, or `tcp://host:port` for a networked bridge.
    pub link: String,
    pub baud_rate: u32,
    pub link_read_timeout: Duration,

    pub http_bind: String,

    pub data_dir: PathBuf,
    pub sync_interval: Duration,

    pub observer_queue: usize,

    /// Offset used to stamp samples and to interpret query times.
    pub utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let link = env_string("TELEMETRY_LINK", Some("/dev/ttyUSB0".to_string()))?;
        let baud_rate = env_u64("TELEMETRY_BAUD_RATE", Some(9600))? as u32;
        let link_read_timeout =
            Duration::from_millis(env_u64("TELEMETRY_LINK_READ_TIMEOUT_MS", Some(1000))?);

        let http_bind = env_string("TELEMETRY_HTTP_BIND", Some("0.0.0.0:5000".to_string()))?;

        let data_dir = PathBuf::from(env_string("TELEMETRY_DATA_DIR", Some("./data".to_string()))?);
        let sync_interval =
            Duration::from_millis(env_u64("TELEMETRY_SYNC_INTERVAL_MS", Some(1000))?);

        let observer_queue = env_u64("TELEMETRY_OBSERVER_QUEUE", Some(256))?.max(1) as usize;

        let utc_offset = match env_optional("TELEMETRY_UTC_OFFSET_MINUTES") {
            Some(raw) => {
                let minutes = raw
                    .parse::<i32>()
                    .context("invalid TELEMETRY_UTC_OFFSET_MINUTES")?;
                FixedOffset::east_opt(minutes * 60)
                    .ok_or_else(|| anyhow!("TELEMETRY_UTC_OFFSET_MINUTES out of range"))?
            }
            None => Local::now().offset().fix(),
        };

        Ok(Self {
            link,
            baud_rate,
            link_read_timeout,
            http_bind,
            data_dir,
            sync_interval,
            observer_queue,
            utc_offset,
        })
    }

    /// Command-line flags win over the environment.
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(link) = &args.link {
            self.link = link.clone();
        }
        if let Some(bind) = &args.bind {
            self.http_bind = bind.clone();
        }
        if let Some(data_dir) = &args.data_dir {
            self.data_dir = data_dir.clone();
        }
        self
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
