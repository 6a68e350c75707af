//! Gateway-wide connection registry and routing.
//!
//! [`GatewayManager`] owns the route table built from the connections
//! config, the registry of live [`ProxyConnection`]s, and the
//! broadcast channel for [`GatewayEvent`]s. Created once at startup;
//! the returned `Arc` is cheap to clone into request handlers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use bs_core::config::{ConnectionConfig, ConnectionsConfig, GlobalConfig};
use bs_core::types::ConnectionId;
use bs_db::DbPool;

use crate::auth::AuthManager;
use crate::connection::{ClientFrame, ConnectionStatus, ProxyConnection, ProxyContext, TargetStatus};
use crate::events::GatewayEvent;
use crate::route_map::{build_route_map, RouteMap};

/// Broadcast channel capacity for gateway events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// WebSocket close code for policy violations (duplicate client,
/// unroutable path).
pub const CLOSE_POLICY: u16 = 1008;

/// WebSocket close code for "going away" (shutdown, disabled lane).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One configured lane with its live status, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub connection_id: ConnectionId,
    pub enabled: bool,
    pub client_endpoint: String,
    pub client_attached: bool,
    pub self_id: Option<i64>,
    pub targets: Vec<TargetStatus>,
}

/// Outcome summary of a config reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    /// Connections in the new config.
    pub connections: usize,
    /// Live connections whose targets were swapped.
    pub reloaded: usize,
    /// Live connections dropped because their config went away.
    pub dropped: usize,
    /// Paths that cannot be served until a restart.
    pub added_paths: Vec<String>,
}

/// Why a client could not attach.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("No route for path {0}")]
    UnknownPath(String),

    #[error("Connection {0} already has a live client")]
    AlreadyAttached(ConnectionId),
}

/// Owns routing, the live-connection registry, and the event channel.
pub struct GatewayManager {
    configs: RwLock<ConnectionsConfig>,
    route_map: RwLock<RouteMap>,
    active: RwLock<HashMap<ConnectionId, Arc<ProxyConnection>>>,
    listen_port: u16,
    pool: DbPool,
    auth: Arc<AuthManager>,
    global: Arc<GlobalConfig>,
    event_tx: broadcast::Sender<GatewayEvent>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl GatewayManager {
    pub fn new(
        configs: ConnectionsConfig,
        listen_port: u16,
        pool: DbPool,
        auth: Arc<AuthManager>,
        global: Arc<GlobalConfig>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let route_map = build_route_map(&configs, listen_port);
        tracing::info!(
            connections = configs.len(),
            routes = route_map.len(),
            "Route table built",
        );

        Arc::new(Self {
            configs: RwLock::new(configs),
            route_map: RwLock::new(route_map),
            active: RwLock::new(HashMap::new()),
            listen_port,
            pool,
            auth,
            global,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to gateway lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.event_tx.subscribe()
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Paths the listener must register routes for.
    pub async fn route_paths(&self) -> Vec<String> {
        self.route_map
            .read()
            .await
            .paths()
            .map(str::to_string)
            .collect()
    }

    /// Which connection does a request path belong to?
    pub async fn resolve_path(&self, path: &str) -> Option<(ConnectionId, ConnectionConfig)> {
        let connection_id = self.route_map.read().await.resolve(path)?.clone();
        let config = self.configs.read().await.get(&connection_id)?.clone();
        Some((connection_id, config))
    }

    /// Register a new client for a connection.
    ///
    /// Rejects the attach while a live client holds the lane; a dead
    /// registration (client channel closed) is swept and replaced.
    pub async fn attach(
        &self,
        connection_id: ConnectionId,
        config: ConnectionConfig,
        client_headers: HashMap<String, String>,
        client_tx: tokio::sync::mpsc::UnboundedSender<ClientFrame>,
    ) -> Result<Arc<ProxyConnection>, AttachError> {
        let mut active = self.active.write().await;

        if let Some(existing) = active.get(&connection_id) {
            if existing.is_client_alive() {
                return Err(AttachError::AlreadyAttached(connection_id));
            }
            tracing::info!(
                connection_id = %connection_id,
                "Sweeping dead registration before attach",
            );
            existing.shutdown();
            active.remove(&connection_id);
        }

        let ctx = ProxyContext {
            pool: self.pool.clone(),
            auth: Arc::clone(&self.auth),
            global: Arc::clone(&self.global),
            event_tx: self.event_tx.clone(),
        };
        let conn = ProxyConnection::new(
            connection_id.clone(),
            config,
            client_headers,
            client_tx,
            ctx,
            self.cancel.child_token(),
        );
        active.insert(connection_id, Arc::clone(&conn));
        Ok(conn)
    }

    /// Remove a connection from the registry, but only if the registry
    /// still holds this exact instance (it may have been replaced).
    pub async fn detach(&self, conn: &Arc<ProxyConnection>) {
        let mut active = self.active.write().await;
        if let Some(current) = active.get(conn.connection_id()) {
            if Arc::ptr_eq(current, conn) {
                active.remove(conn.connection_id());
            }
        }
    }

    pub async fn attached_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Every configured lane with its live status.
    pub async fn reports(&self) -> Vec<ConnectionReport> {
        let configs = self.configs.read().await.clone();
        let active = self.active.read().await.clone();

        let mut reports = Vec::with_capacity(configs.len());
        for (connection_id, config) in configs {
            let status: Option<ConnectionStatus> = match active.get(&connection_id) {
                Some(conn) => Some(conn.status().await),
                None => None,
            };
            let (client_attached, self_id, targets) = match status {
                Some(status) => (status.client_attached, status.self_id, status.targets),
                None => (
                    false,
                    None,
                    config
                        .target_endpoints
                        .iter()
                        .enumerate()
                        .map(|(i, e)| TargetStatus {
                            index: i + 1,
                            url: e.url().to_string(),
                            sakoya_protocol: e.sakoya_protocol(),
                            disabled: e.disabled(),
                            connected: false,
                        })
                        .collect(),
                ),
            };
            reports.push(ConnectionReport {
                connection_id,
                enabled: config.enabled,
                client_endpoint: config.client_endpoint.clone(),
                client_attached,
                self_id,
                targets,
            });
        }
        reports
    }

    /// Apply a re-read connections config.
    ///
    /// Live lanes that survive get their target endpoints swapped;
    /// lanes that were removed or disabled are closed. Brand-new
    /// client paths need a restart (listener routes are fixed at
    /// startup) and are reported back.
    pub async fn reload(&self, new_configs: ConnectionsConfig) -> ReloadReport {
        let new_route_map = build_route_map(&new_configs, self.listen_port);

        let old_paths: HashSet<String> = self
            .route_map
            .read()
            .await
            .paths()
            .map(str::to_string)
            .collect();
        let added_paths: Vec<String> = new_route_map
            .paths()
            .filter(|p| !old_paths.contains(*p))
            .map(str::to_string)
            .collect();
        if !added_paths.is_empty() {
            tracing::warn!(
                paths = ?added_paths,
                "New client paths require a restart to be served",
            );
        }

        *self.route_map.write().await = new_route_map;
        *self.configs.write().await = new_configs.clone();

        let active = { self.active.read().await.clone() };
        let mut reloaded = 0;
        let mut dropped = 0;
        for (connection_id, conn) in active {
            match new_configs.get(&connection_id) {
                Some(config) if config.enabled => {
                    conn.reload_targets(config.clone()).await;
                    reloaded += 1;
                }
                _ => {
                    tracing::info!(
                        connection_id = %connection_id,
                        "Connection removed or disabled, closing client",
                    );
                    conn.close_client(CLOSE_GOING_AWAY, "Connection disabled");
                    conn.shutdown();
                    self.active.write().await.remove(&connection_id);
                    dropped += 1;
                }
            }
        }

        ReloadReport {
            connections: new_configs.len(),
            reloaded,
            dropped,
            added_paths,
        }
    }

    /// Close every connection and stop all target tasks.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down gateway manager");
        self.cancel.cancel();

        let mut active = self.active.write().await;
        for (connection_id, conn) in active.drain() {
            tracing::info!(connection_id = %connection_id, "Closing connection");
            conn.close_client(CLOSE_GOING_AWAY, "Server shutting down");
        }

        tracing::info!("Gateway manager shut down complete");
    }
}
