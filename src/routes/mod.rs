pub mod health;
pub mod speech;

use axum::{http::StatusCode, Router};
use tower_http::trace::TraceLayer;

use crate::utils::cors;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::router())
        .merge(speech::router())
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .with_state(state);

    cors::apply(router).layer(TraceLayer::new_for_http())
}
