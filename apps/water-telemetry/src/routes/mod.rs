pub mod command;
pub mod health;
pub mod latest;
pub mod live;
pub mod range;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(latest::router())
        .merge(range::router())
        .merge(command::router())
        .merge(live::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs store or link I/O off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(AppError::internal)?
}
