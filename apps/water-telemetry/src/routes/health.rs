use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::ingest::IngestSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LinkStatus {
    pub target: String,
    pub up: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub link: LinkStatus,
    pub ingest: IngestSnapshot,
    pub observers: usize,
}

pub(crate) async fn healthz_handler() -> &'static str {
    "ok"
}

pub(crate) async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        link: LinkStatus {
            target: state.config.link.clone(),
            up: !state.health.is_failed(),
            last_error: state.health.last_error(),
        },
        ingest: state.stats.snapshot(),
        observers: state.hub.observer_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/v1/status", get(status_handler))
}
