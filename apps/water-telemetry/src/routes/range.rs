use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use url::form_urlencoded;

use crate::error::AppResult;
use crate::query::{RangeRequest, RangeResult, TimeWindow};
use crate::routes::blocking;
use crate::state::AppState;

#[derive(Debug, Default)]
struct RangeParams {
    from: Option<String>,
    to: Option<String>,
    channel: Option<String>,
}

impl RangeParams {
    fn parse(raw: Option<String>) -> Self {
        let mut params = Self::default();
        if let Some(raw) = raw {
            for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
                match key.as_ref() {
                    "from" => params.from = Some(value.into_owned()),
                    "to" => params.to = Some(value.into_owned()),
                    // `tank` is what the first dashboard sent.
                    "channel" | "tank" => {
                        if params.channel.is_none() || key == "channel" {
                            params.channel = Some(value.into_owned());
                        }
                    }
                    _ => {}
                }
            }
        }
        params
    }
}

fn range_response(result: RangeResult) -> Response {
    match result {
        RangeResult::Rows(rows) => Json(rows).into_response(),
        RangeResult::Total(rows) => Json(rows).into_response(),
        RangeResult::NoData => Json(json!({ "message": "no data found" })).into_response(),
    }
}

pub(crate) async fn range_handler(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> AppResult<Response> {
    let params = RangeParams::parse(raw);
    let request = RangeRequest::parse(
        params.from.as_deref(),
        params.to.as_deref(),
        params.channel.as_deref(),
        &state.config.utc_offset,
    )?;
    tracing::debug!(?request, "range query");

    let engine = state.engine.clone();
    let result = blocking(move || Ok(engine.query(&request)?)).await?;
    Ok(range_response(result))
}

pub(crate) async fn flow_range_handler(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> AppResult<Response> {
    let params = RangeParams::parse(raw);
    let window = TimeWindow::parse(
        params.from.as_deref(),
        params.to.as_deref(),
        &state.config.utc_offset,
    )?;

    let engine = state.engine.clone();
    let result = blocking(move || Ok(engine.flow_range(&window)?)).await?;
    Ok(range_response(result))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/get-data-range", get(range_handler))
        .route("/get-data-range-flow", get(flow_range_handler))
}
