use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::health::HealthState;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    db_healthy: bool,
}

/// Container-host liveness probe. 200 only while the database monitor
/// reports healthy; otherwise 503 so repeated probes mark the
/// container unhealthy.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status_code, status, db_healthy) = match state.health.state() {
        HealthState::Healthy => (StatusCode::OK, "ok", true),
        HealthState::Starting => (StatusCode::SERVICE_UNAVAILABLE, "starting", false),
        HealthState::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", false),
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            db_healthy,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
