use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderName, Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use bs_core::config::{ConnectionConfig, ConnectionsConfig, GlobalConfig, TargetEndpoint};
use bs_db::DbPool;
use bs_gateway::config::ServerConfig;
use bs_gateway::health::{HealthMonitor, HealthState};
use bs_gateway::state::AppState;
use bs_gateway::{routes, ws};
use bs_proxy::auth::AuthManager;
use bs_proxy::GatewayManager;

/// Build a test `ServerConfig` with safe defaults. Directories point
/// into the temp dir; tests that touch them create them first.
pub fn test_config() -> ServerConfig {
    let base = std::env::temp_dir().join(format!("bs-test-{}", uuid::Uuid::new_v4()));
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 5111,
        data_dir: base.join("data"),
        config_dir: base.join("config"),
        log_dir: base.join("logs"),
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// A connections config with one enabled and one disabled lane.
pub fn test_connections() -> ConnectionsConfig {
    let mut configs = ConnectionsConfig::new();
    configs.insert(
        "main".to_string(),
        ConnectionConfig {
            enabled: true,
            client_endpoint: "ws://0.0.0.0:5111/bs/main".to_string(),
            target_endpoints: vec![TargetEndpoint::Url("ws://127.0.0.1:1/unused".to_string())],
        },
    );
    configs.insert(
        "spare".to_string(),
        ConnectionConfig {
            enabled: false,
            client_endpoint: "ws://0.0.0.0:5111/bs/spare".to_string(),
            target_endpoints: vec![],
        },
    );
    configs
}

/// Build the full application router with all middleware layers, using
/// the given database pool and a pinned health state.
///
/// This mirrors the router construction in `main.rs` so integration
/// tests exercise the same middleware stack (request ID, timeout,
/// tracing, panic recovery) that production uses.
pub fn build_test_app_with_health(pool: DbPool, health: HealthState) -> (Router, AppState) {
    let config = test_config();
    let global = Arc::new(GlobalConfig::default());
    let auth = Arc::new(AuthManager::new(pool.clone(), global.security.clone()));
    let manager = GatewayManager::new(
        test_connections(),
        config.port,
        pool.clone(),
        auth,
        global,
    );

    let state = AppState {
        pool,
        config: Arc::new(config),
        manager,
        health: HealthMonitor::fixed(health),
    };

    let request_id_header = HeaderName::from_static("x-request-id");

    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .route("/bs/main", get(ws::ws_handler))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state.clone());

    (app, state)
}

pub fn build_test_app(pool: DbPool) -> (Router, AppState) {
    build_test_app_with_health(pool, HealthState::Healthy)
}

/// Issue a GET request against the app.
pub async fn get_uri(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Issue a POST request with an empty body against the app.
pub async fn post_uri(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// The config dir of a state, created on demand (reload tests).
pub fn ensure_config_dir(state: &AppState) -> PathBuf {
    std::fs::create_dir_all(&state.config.config_dir).unwrap();
    state.config.config_dir.clone()
}
