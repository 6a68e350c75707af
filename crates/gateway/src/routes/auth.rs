//! Admin API over bot authentication state.

use axum::extract::{Path, State};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use bs_db::models::AuthStatus;
use bs_proxy::auth::TempKey;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// `GET /api/v1/auth/keys` — unexpired temporary keys. This is the
/// operator-facing way to retrieve a freshly generated key besides
/// the log line.
async fn list_keys(State(state): State<AppState>) -> Json<DataResponse<Vec<TempKey>>> {
    Json(DataResponse {
        data: state.manager.auth().valid_keys(),
    })
}

/// `GET /api/v1/auth/status/{bot_id}` — auth state for one bot, null
/// when the bot has never attempted verification.
async fn auth_status(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> AppResult<Json<DataResponse<Option<AuthStatus>>>> {
    let status = state.manager.auth().status(&bot_id).await?;
    Ok(Json(DataResponse { data: status }))
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    bot_id: String,
    removed: bool,
}

/// `DELETE /api/v1/auth/status/{bot_id}` — forget a bot account.
async fn logout(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> AppResult<Json<DataResponse<LogoutResponse>>> {
    let removed = state.manager.auth().logout(&bot_id).await?;
    Ok(Json(DataResponse {
        data: LogoutResponse { bot_id, removed },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/keys", get(list_keys))
        .route("/status/{bot_id}", get(auth_status).delete(logout))
}
