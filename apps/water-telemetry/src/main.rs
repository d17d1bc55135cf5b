use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use water_telemetry::config::Config;
use water_telemetry::dispatch::CommandDispatcher;
use water_telemetry::hub::FanoutHub;
use water_telemetry::ingest::{await_link_failure, spawn_ingest_thread, IngestLoop, IngestStats};
use water_telemetry::link::{self, LinkHealth};
use water_telemetry::query::QueryEngine;
use water_telemetry::state::AppState;
use water_telemetry::store::ChannelStore;
use water_telemetry::time::{Clock, SystemClock};
use water_telemetry::{cli, routes};

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,water_telemetry=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "failed to bind water-telemetry listener on {addr}: port already in use; pass --bind to choose another address",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind water-telemetry listener on {addr}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = cli::Args::parse();
    let config = Config::from_env()?.apply_args(&args);
    init_tracing()?;

    let store = Arc::new(ChannelStore::open(&config).context("failed to open channel store")?);
    tracing::info!(data_dir = %store.data_dir().display(), "channel store ready");

    let (reader, writer) = link::open(&config)?;
    tracing::info!(link = %config.link, baud_rate = config.baud_rate, "device link open");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.utc_offset));
    let hub = Arc::new(FanoutHub::new(config.observer_queue));
    let health = Arc::new(LinkHealth::default());
    let stats = Arc::new(IngestStats::default());

    let ingest_done = spawn_ingest_thread(IngestLoop::new(
        reader,
        store.clone(),
        hub.clone(),
        clock.clone(),
        stats.clone(),
        health.clone(),
    ))?;

    let state = AppState {
        config: config.clone(),
        engine: QueryEngine::new(store.clone()),
        hub,
        dispatcher: CommandDispatcher::new(writer, health.clone()),
        clock,
        stats,
        health,
    };

    let app = routes::router(state);
    let listener = bind_listener(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "water-telemetry HTTP listening");
    let http_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::spawn(await_link_failure(ingest_done));

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
        result = http_handle => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(anyhow::Error::new(err).context("HTTP server failed")),
            Err(err) => Err(anyhow::Error::new(err).context("HTTP server task panicked")),
        },
    };

    store.sync_all();
    outcome
}
