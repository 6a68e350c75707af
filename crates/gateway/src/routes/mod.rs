//! HTTP route tree.
//!
//! `/health` lives at the root; everything else sits under `/api/v1`.

pub mod auth;
pub mod connections;
pub mod health;
pub mod messages;

use axum::Router;

use crate::state::AppState;

/// Routes mounted under `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/connections", connections::router())
        .nest("/messages", messages::router())
        .nest("/auth", auth::router())
}
