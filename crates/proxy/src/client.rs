//! WebSocket client for dialing a target endpoint.
//!
//! [`TargetClient`] holds everything needed to (re)connect one target
//! of a proxy connection: the endpoint settings plus the headers
//! captured from the bot client's own handshake. Frameworks key their
//! session off headers like `x-self-id`, so those are forwarded on the
//! outbound handshake; endpoint-specific headers take precedence.

use std::collections::HashMap;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use bs_core::config::TargetEndpoint;

/// The raw stream type for an established target link.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Client handshake headers worth forwarding to targets.
pub const FORWARDED_HEADERS: &[&str] = &["authorization", "x-self-id", "x-client-role", "user-agent"];

/// Connection configuration for a single target of one proxy lane.
pub struct TargetClient {
    connection_id: String,
    target_index: usize,
    endpoint: TargetEndpoint,
    client_headers: HashMap<String, String>,
}

impl TargetClient {
    /// * `client_headers` - lowercase header name to value, as captured
    ///   from the bot client's upgrade request.
    pub fn new(
        connection_id: String,
        target_index: usize,
        endpoint: TargetEndpoint,
        client_headers: HashMap<String, String>,
    ) -> Self {
        Self {
            connection_id,
            target_index,
            endpoint,
            client_headers,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn target_index(&self) -> usize {
        self.target_index
    }

    pub fn url(&self) -> &str {
        self.endpoint.url()
    }

    /// Connect to the target endpoint.
    ///
    /// Forwards the selected client headers, then applies the
    /// endpoint's own headers on top.
    pub async fn connect(&self) -> Result<WsStream, TargetClientError> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| TargetClientError::Connection(format!("Invalid target URL {}: {e}", self.url())))?;

        {
            let headers = request.headers_mut();
            for name in FORWARDED_HEADERS {
                if let Some(value) = self.client_headers.get(*name) {
                    insert_header(headers, name, value)?;
                }
            }
            if let Some(custom) = self.endpoint.headers() {
                for (name, value) in custom {
                    insert_header(headers, name, value)?;
                }
            }
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            TargetClientError::Connection(format!(
                "Failed to connect to target at {}: {e}",
                self.url()
            ))
        })?;

        tracing::info!(
            connection_id = %self.connection_id,
            target_index = self.target_index,
            "Connected to target at {}",
            self.url(),
        );

        Ok(ws_stream)
    }
}

fn insert_header(
    headers: &mut tokio_tungstenite::tungstenite::http::HeaderMap,
    name: &str,
    value: &str,
) -> Result<(), TargetClientError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TargetClientError::InvalidHeader(format!("{name}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| TargetClientError::InvalidHeader(format!("{name}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}

/// Errors that can occur when dialing a target.
#[derive(Debug, thiserror::Error)]
pub enum TargetClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A header captured from the client or config is not expressible
    /// on the outbound handshake.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
