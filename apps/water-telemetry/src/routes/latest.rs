use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppResult;
use crate::query::LatestData;
use crate::routes::blocking;
use crate::state::AppState;
use crate::time::Clock;

/// Newest row per channel, with today's harvested volume for the tanks.
pub(crate) async fn latest_handler(State(state): State<AppState>) -> AppResult<Json<LatestData>> {
    let now = state.clock.now();
    let engine = state.engine.clone();
    let latest = blocking(move || Ok(engine.latest_data(now)?)).await?;
    Ok(Json(latest))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/get-latest-data", get(latest_handler))
}
