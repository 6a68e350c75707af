//! Connection and security configuration types.
//!
//! These are the serde models for the gateway's JSON config files
//! (`connections.json`, `global.json`) plus the `ws://` endpoint parser
//! used to build the WebSocket route table.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::ConnectionId;

/// Map of connection id to its configuration, as stored in
/// `connections.json`. `BTreeMap` keeps serialization order stable.
pub type ConnectionsConfig = BTreeMap<ConnectionId, ConnectionConfig>;

/// One proxy lane: a client-facing WebSocket endpoint and the set of
/// downstream targets its traffic fans out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Disabled connections are not routed at all.
    #[serde(default)]
    pub enabled: bool,
    /// Where the bot client connects, e.g. `ws://0.0.0.0:5111/bs/yunzai`.
    pub client_endpoint: String,
    /// Downstream framework endpoints, in 1-based target-index order.
    #[serde(default)]
    pub target_endpoints: Vec<TargetEndpoint>,
}

impl ConnectionConfig {
    /// Iterate enabled targets as `(target_index, endpoint)` pairs.
    /// Disabled endpoints are skipped but still occupy their index.
    pub fn enabled_targets(&self) -> impl Iterator<Item = (usize, &TargetEndpoint)> {
        self.target_endpoints
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.disabled())
            .map(|(i, t)| (i + 1, t))
    }
}

/// A target endpoint, either a bare URL string or a detailed object.
///
/// The bare form is kept for config-file ergonomics; both deserialize
/// from the same `target_endpoints` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetEndpoint {
    Url(String),
    Detailed(TargetEndpointConfig),
}

/// Detailed target endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEndpointConfig {
    pub url: String,
    /// Extra headers sent on the outbound handshake. These take
    /// precedence over headers forwarded from the client.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// A disabled endpoint keeps its target index but is never dialed.
    #[serde(default)]
    pub disabled: bool,
    /// Whether this endpoint speaks the Sakoya (gscore) protocol and
    /// needs translation.
    #[serde(default)]
    pub sakoya_protocol: bool,
}

impl TargetEndpoint {
    pub fn url(&self) -> &str {
        match self {
            TargetEndpoint::Url(url) => url,
            TargetEndpoint::Detailed(cfg) => &cfg.url,
        }
    }

    pub fn headers(&self) -> Option<&HashMap<String, String>> {
        match self {
            TargetEndpoint::Url(_) => None,
            TargetEndpoint::Detailed(cfg) => Some(&cfg.headers),
        }
    }

    pub fn disabled(&self) -> bool {
        match self {
            TargetEndpoint::Url(_) => false,
            TargetEndpoint::Detailed(cfg) => cfg.disabled,
        }
    }

    pub fn sakoya_protocol(&self) -> bool {
        match self {
            TargetEndpoint::Url(_) => false,
            TargetEndpoint::Detailed(cfg) => cfg.sakoya_protocol,
        }
    }
}

/// Global gateway settings from `global.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Prefix for in-band gateway commands (the auth command).
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            security: SecurityConfig::default(),
        }
    }
}

fn default_command_prefix() -> String {
    "bs".to_string()
}

/// Key-authentication settings for bot accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// When false, every bot is treated as authenticated.
    #[serde(default)]
    pub auth_enabled: bool,
    /// Failed verifications allowed before a ban.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Ban duration in minutes.
    #[serde(default = "default_ban_duration")]
    pub ban_duration_minutes: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            max_attempts: default_max_attempts(),
            ban_duration_minutes: default_ban_duration(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_ban_duration() -> i64 {
    30
}

/// A `ws://` endpoint split into its routable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Parse a client endpoint of the form `ws://host:port/path`.
///
/// The path defaults to `/`, the port to 80. Only the `ws://` scheme is
/// accepted; client endpoints are local listeners, never TLS.
pub fn parse_ws_endpoint(endpoint: &str) -> Result<ParsedEndpoint, CoreError> {
    let rest = endpoint
        .strip_prefix("ws://")
        .ok_or_else(|| CoreError::Validation(format!("Unsupported endpoint format: {endpoint}")))?;

    let (host_port, path) = match rest.split_once('/') {
        Some((hp, p)) => (hp, format!("/{p}")),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => {
            let port: u16 = p.parse().map_err(|_| {
                CoreError::Validation(format!("Invalid port in endpoint: {endpoint}"))
            })?;
            (h.to_string(), port)
        }
        None => (host_port.to_string(), 80),
    };

    if host.is_empty() {
        return Err(CoreError::Validation(format!(
            "Missing host in endpoint: {endpoint}"
        )));
    }

    Ok(ParsedEndpoint { host, port, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_endpoint() {
        let parsed = parse_ws_endpoint("ws://0.0.0.0:5111/bs/yunzai").unwrap();
        assert_eq!(parsed.host, "0.0.0.0");
        assert_eq!(parsed.port, 5111);
        assert_eq!(parsed.path, "/bs/yunzai");
    }

    #[test]
    fn parse_endpoint_without_path() {
        let parsed = parse_ws_endpoint("ws://127.0.0.1:8080").unwrap();
        assert_eq!(parsed.path, "/");
    }

    #[test]
    fn parse_endpoint_without_port_defaults_to_80() {
        let parsed = parse_ws_endpoint("ws://localhost/ws").unwrap();
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path, "/ws");
    }

    #[test]
    fn reject_non_ws_scheme() {
        assert!(parse_ws_endpoint("http://localhost:5111/").is_err());
        assert!(parse_ws_endpoint("wss://localhost:5111/").is_err());
    }

    #[test]
    fn reject_invalid_port() {
        assert!(parse_ws_endpoint("ws://localhost:notaport/").is_err());
    }

    #[test]
    fn target_endpoint_accepts_bare_url() {
        let endpoint: TargetEndpoint = serde_json::from_str(r#""ws://127.0.0.1:2536/OneBotv11""#)
            .expect("bare URL should deserialize");
        assert_eq!(endpoint.url(), "ws://127.0.0.1:2536/OneBotv11");
        assert!(!endpoint.disabled());
        assert!(!endpoint.sakoya_protocol());
    }

    #[test]
    fn target_endpoint_accepts_detailed_object() {
        let json = r#"{
            "url": "ws://127.0.0.1:8765/ws/NoneBot2",
            "headers": {"authorization": "Bearer token"},
            "sakoya_protocol": true
        }"#;
        let endpoint: TargetEndpoint = serde_json::from_str(json).unwrap();
        assert_eq!(endpoint.url(), "ws://127.0.0.1:8765/ws/NoneBot2");
        assert!(endpoint.sakoya_protocol());
        assert_eq!(
            endpoint.headers().unwrap().get("authorization").unwrap(),
            "Bearer token"
        );
    }

    #[test]
    fn connection_config_enabled_targets_keeps_indexes() {
        let json = r#"{
            "enabled": true,
            "client_endpoint": "ws://0.0.0.0:5111/bs/main",
            "target_endpoints": [
                "ws://one",
                {"url": "ws://two", "disabled": true},
                "ws://three"
            ]
        }"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        let targets: Vec<(usize, &str)> = config
            .enabled_targets()
            .map(|(i, t)| (i, t.url()))
            .collect();
        assert_eq!(targets, vec![(1, "ws://one"), (3, "ws://three")]);
    }

    #[test]
    fn global_config_defaults() {
        let config: GlobalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.command_prefix, "bs");
        assert!(!config.security.auth_enabled);
        assert_eq!(config.security.max_attempts, 3);
        assert_eq!(config.security.ban_duration_minutes, 30);
    }
}
