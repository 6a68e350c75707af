//! Admin API over persisted message traffic.

use axum::extract::{Path, Query, State};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use bs_db::models::{Direction, MessageRecord};
use bs_db::repositories::MessageRepo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
struct RecentQuery {
    connection_id: Option<String>,
    limit: Option<i64>,
}

/// `GET /api/v1/messages/recent?connection_id=..&limit=..`
async fn recent_messages(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> AppResult<Json<DataResponse<Vec<MessageRecord>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let rows = MessageRepo::recent(&state.pool, query.connection_id.as_deref(), limit).await?;
    Ok(Json(DataResponse { data: rows }))
}

#[derive(Debug, Serialize)]
struct MessageStats {
    connection_id: String,
    received: i64,
    sent: i64,
}

/// `GET /api/v1/messages/stats/{connection_id}`
async fn message_stats(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> AppResult<Json<DataResponse<MessageStats>>> {
    let received =
        MessageRepo::count_by_direction(&state.pool, &connection_id, Direction::Recv).await?;
    let sent = MessageRepo::count_by_direction(&state.pool, &connection_id, Direction::Send).await?;
    Ok(Json(DataResponse {
        data: MessageStats {
            connection_id,
            received,
            sent,
        },
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/recent", get(recent_messages))
        .route("/stats/{connection_id}", get(message_stats))
}
