//! Admin API for configured proxy connections.

use axum::extract::State;
use axum::{routing::get, routing::post, Json, Router};
use bs_proxy::manager::{ConnectionReport, ReloadReport};

use crate::config::load_or_init_connections;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// `GET /api/v1/connections` — every configured lane with live status.
async fn list_connections(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<ConnectionReport>>>> {
    let reports = state.manager.reports().await;
    Ok(Json(DataResponse { data: reports }))
}

/// `POST /api/v1/connections/reload` — re-read `connections.json` and
/// swap target endpoints on live connections.
async fn reload_connections(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<ReloadReport>>> {
    let configs = load_or_init_connections(&state.config.config_dir)
        .map_err(|e| AppError::BadRequest(format!("Cannot reload connections config: {e}")))?;

    let report = state.manager.reload(configs).await;
    tracing::info!(
        connections = report.connections,
        reloaded = report.reloaded,
        dropped = report.dropped,
        "Connections config reloaded",
    );
    Ok(Json(DataResponse { data: report }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_connections))
        .route("/reload", post(reload_connections))
}
