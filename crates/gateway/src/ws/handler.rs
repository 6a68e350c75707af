//! WebSocket upgrade handler for bot clients.
//!
//! Paths are routed through the manager's route table; the same
//! handler serves every configured client endpoint. After the upgrade
//! the socket is bridged to a [`ProxyConnection`]: a spawned sender
//! task drains the connection's outbound channel into the socket
//! while this task feeds inbound frames into the connection.

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use bs_proxy::client::FORWARDED_HEADERS;
use bs_proxy::manager::CLOSE_POLICY;
use bs_proxy::ClientFrame;

use crate::state::AppState;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let client_headers = capture_forward_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, path, client_headers, state))
}

/// Pick out the handshake headers targets need (frameworks key their
/// session off `x-self-id` and friends).
fn capture_forward_headers(headers: &HeaderMap) -> HashMap<String, String> {
    FORWARDED_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// Manage a single client socket after upgrade.
async fn handle_socket(
    mut socket: WebSocket,
    path: String,
    client_headers: HashMap<String, String>,
    state: AppState,
) {
    let Some((connection_id, config)) = state.manager.resolve_path(&path).await else {
        tracing::warn!(path = %path, "No route for WebSocket path");
        close_with(&mut socket, CLOSE_POLICY, "No route for path").await;
        return;
    };

    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let conn = match state
        .manager
        .attach(connection_id.clone(), config, client_headers, client_tx)
        .await
    {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                error = %e,
                "Client rejected",
            );
            close_with(&mut socket, CLOSE_POLICY, "Connection already exists").await;
            return;
        }
    };

    tracing::info!(connection_id = %connection_id, path = %path, "Client attached");

    let (mut sink, mut stream) = socket.split();

    // Sender task: drain the proxy's outbound channel into the socket.
    let sender_conn_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            let message = match frame {
                ClientFrame::Text(text) => Message::Text(text.into()),
                ClientFrame::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                tracing::debug!(connection_id = %sender_conn_id, "Client sink closed");
                break;
            }
        }
    });

    // The client's first frame is its registration; targets are only
    // dialed once it arrives.
    if let Some(first) = next_text_frame(&mut stream, &connection_id).await {
        conn.start(first).await;

        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => conn.handle_client_frame(text.as_str()).await,
                Ok(Message::Binary(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    conn.handle_client_frame(&text).await;
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(connection_id = %connection_id, ?frame, "Client sent close");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by the ws stack.
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Client receive error",
                    );
                    break;
                }
            }
        }
    }

    conn.client_disconnected();
    state.manager.detach(&conn).await;
    send_task.abort();
    tracing::info!(connection_id = %connection_id, "Client disconnected");
}

/// Wait for the first text (or binary-as-text) frame from the client.
async fn next_text_frame(
    stream: &mut futures::stream::SplitStream<WebSocket>,
    connection_id: &str,
) -> Option<String> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Binary(bytes)) => {
                return Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "Client closed before registering");
                return None;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "Client receive error before registration",
                );
                return None;
            }
        }
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
