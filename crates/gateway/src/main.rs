use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bs_gateway::config::{load_or_init_connections, load_or_init_global, ServerConfig};
use bs_gateway::health::{HealthMonitor, ProbePolicy};
use bs_gateway::state::AppState;
use bs_gateway::{routes, ws};
use bs_proxy::auth::AuthManager;
use bs_proxy::GatewayManager;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration & directories ---
    let config = ServerConfig::from_env();
    config
        .ensure_directories()
        .expect("Failed to create runtime directories");

    // --- Tracing (console + plain file in the log directory) ---
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir.join("botshepherd.log"))
        .expect("Failed to open log file");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bs_gateway=info,bs_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = config.database_url();

    let pool = bs_db::create_pool(&database_url)
        .await
        .expect("Failed to open database");
    tracing::info!("Database connection pool created");

    bs_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    bs_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- JSON configs ---
    let global = Arc::new(
        load_or_init_global(&config.config_dir).expect("Failed to load global config"),
    );
    let connections =
        load_or_init_connections(&config.config_dir).expect("Failed to load connections config");

    // --- Auth manager ---
    let auth = Arc::new(AuthManager::new(pool.clone(), global.security.clone()));
    auth.initialize().await;

    // --- Gateway manager ---
    let manager = GatewayManager::new(
        connections,
        config.port,
        pool.clone(),
        Arc::clone(&auth),
        Arc::clone(&global),
    );

    // --- Gateway event log ---
    let mut events = manager.subscribe();
    let event_log_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(event = ?event, "Gateway event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Gateway event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // --- Health monitor ---
    let health_cancel = tokio_util::sync::CancellationToken::new();
    let (health, health_handle) = HealthMonitor::start(
        pool.clone(),
        ProbePolicy::default(),
        health_cancel.clone(),
    );

    // --- App state ---
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        manager: Arc::clone(&manager),
        health,
    };

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let mut app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes());

    // One WebSocket route per configured client path.
    for path in manager.route_paths().await {
        if path == "/health" || path.starts_with("/api/") {
            tracing::warn!(path = %path, "Client path shadows an HTTP route, skipped");
            continue;
        }
        tracing::info!(path = %path, "Serving WebSocket route");
        app = app.route(&path, get(ws::ws_handler));
    }

    let app = app
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Request timeout (WebSocket upgrades finish well within it).
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Close proxy connections first (they hold live sockets).
    manager.shutdown().await;
    tracing::info!("Gateway manager shut down");

    // Stop the health monitor.
    health_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    tracing::info!("Health monitor stopped");

    event_log_handle.abort();

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
