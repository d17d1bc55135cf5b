use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "water-telemetry",
    version,
    about = "Tank/flow/valve telemetry ingest and command relay"
)]
pub struct Args {
    /// Device link: serial path (e.g. /dev/ttyUSB0, COM4) or tcp://host:port.
    #[arg(long)]
    pub link: Option<String>,
    /// HTTP/WebSocket listen address.
    #[arg(long)]
    pub bind: Option<String>,
    /// Directory holding the per-channel logs.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}
