use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let now = chrono::Utc::now();

    // Report only; never triggers a refresh.
    let session = match state.sessions.cached() {
        Some(session) => json!({
            "cached": true,
            "region": session.region(),
            "expires_at": session.expires_at,
            "expires_in_secs": session.remaining_secs(now.timestamp()),
            "fresh": session.is_fresh(now.timestamp()),
        }),
        None => json!({ "cached": false }),
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "session": session,
            "timestamp": now.to_rfc3339(),
        })),
    )
}
