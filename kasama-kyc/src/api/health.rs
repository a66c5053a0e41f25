//! Health endpoint

use crate::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// GET /health
///
/// Reports readiness without blocking on the face model: the service
/// serves requests before pre-warm completes, so `face_model_ready` is
/// informational.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = (chrono::Utc::now() - state.startup_time).num_seconds();
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    Json(json!({
        "service": "kasama-kyc",
        "version": env!("CARGO_PKG_VERSION"),
        "status": if db_ok { "ok" } else { "degraded" },
        "uptime_seconds": uptime,
        "face_model_ready": state.face_model.is_ready(),
        "database": if db_ok { "ok" } else { "unavailable" },
    }))
}
