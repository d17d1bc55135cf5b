use crate::config::Config;
use crate::dispatch::CommandDispatcher;
use crate::hub::FanoutHub;
use crate::ingest::IngestStats;
use crate::link::LinkHealth;
use crate::query::QueryEngine;
use crate::time::Clock;
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: QueryEngine,
    pub hub: Arc<FanoutHub>,
    pub dispatcher: CommandDispatcher,
    pub clock: Arc<dyn Clock>,
    pub stats: Arc<IngestStats>,
    pub health: Arc<LinkHealth>,
}

impl FromRef<AppState> for QueryEngine {
    fn from_ref(state: &AppState) -> QueryEngine {
        state.engine.clone()
    }
}

impl FromRef<AppState> for Arc<FanoutHub> {
    fn from_ref(state: &AppState) -> Arc<FanoutHub> {
        state.hub.clone()
    }
}
