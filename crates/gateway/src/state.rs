use std::sync::Arc;

use crate::config::ServerConfig;
use crate::health::HealthMonitor;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: bs_db::DbPool,
    /// Server configuration (paths, timeouts).
    pub config: Arc<ServerConfig>,
    /// Proxy engine: routing, live connections, auth.
    pub manager: Arc<bs_proxy::GatewayManager>,
    /// Cached database health driving `/health`.
    pub health: HealthMonitor,
}
