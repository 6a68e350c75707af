//! Path-based routing table for the WebSocket listener.
//!
//! Client endpoints like `ws://0.0.0.0:5111/bs/yunzai` all share one
//! listener; the path decides which configured connection a client is
//! attaching to.

use std::collections::HashMap;

use bs_core::config::{parse_ws_endpoint, ConnectionsConfig};
use bs_core::types::ConnectionId;

/// Immutable snapshot of path-to-connection routing.
#[derive(Debug, Default)]
pub struct RouteMap {
    paths: HashMap<String, ConnectionId>,
}

impl RouteMap {
    /// Look up which connection a request path belongs to.
    pub fn resolve(&self, path: &str) -> Option<&ConnectionId> {
        self.paths.get(path)
    }

    /// All registered paths (for listener route registration).
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Build the routing table from the connections config.
///
/// Disabled connections are skipped. Endpoints on a port other than
/// the gateway listener cannot be served and are skipped with a
/// warning, as are path conflicts (first writer wins).
pub fn build_route_map(configs: &ConnectionsConfig, listen_port: u16) -> RouteMap {
    let mut paths: HashMap<String, ConnectionId> = HashMap::new();

    for (connection_id, config) in configs {
        if !config.enabled {
            continue;
        }

        let parsed = match parse_ws_endpoint(&config.client_endpoint) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(
                    connection_id = %connection_id,
                    endpoint = %config.client_endpoint,
                    error = %e,
                    "Failed to parse client endpoint",
                );
                continue;
            }
        };

        if parsed.port != listen_port {
            tracing::warn!(
                connection_id = %connection_id,
                endpoint_port = parsed.port,
                listen_port,
                "Client endpoint port differs from the listener, connection unreachable",
            );
            continue;
        }

        if let Some(existing) = paths.get(&parsed.path) {
            tracing::warn!(
                path = %parsed.path,
                existing = %existing,
                ignored = %connection_id,
                "Path conflict, connection ignored",
            );
            continue;
        }

        tracing::debug!(
            path = %parsed.path,
            connection_id = %connection_id,
            "Registered WebSocket route",
        );
        paths.insert(parsed.path, connection_id.clone());
    }

    RouteMap { paths }
}
