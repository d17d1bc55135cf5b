use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::dispatch::Command;
use crate::error::AppResult;
use crate::routes::blocking;
use crate::state::AppState;

pub(crate) async fn send_command_handler(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> AppResult<Json<Value>> {
    let dispatcher = state.dispatcher.clone();
    blocking(move || Ok(dispatcher.send(&command)?)).await?;
    Ok(Json(json!({ "message": "command sent" })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/send-command", post(send_command_handler))
}
