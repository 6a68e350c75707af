//! One live proxy lane: a bot client fanned out to its targets.
//!
//! The gateway's WebSocket handler owns the client socket and feeds
//! inbound frames into [`ProxyConnection::handle_client_frame`];
//! outbound frames travel back through an unbounded channel of
//! [`ClientFrame`]s. Each enabled target runs its own task
//! (connect -> pump -> reconnect) tied to a generation token so a
//! config reload can retire a whole set of links at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use bs_core::config::{ConnectionConfig, GlobalConfig, TargetEndpoint};
use bs_core::onebot::event::{
    classify, echo_str, message_sent_event, skip_for_sakoya, ApiCall, ApiResponse, EventView,
    FrameKind,
};
use bs_core::types::ConnectionId;
use bs_db::models::{Direction, NewMessage};
use bs_db::repositories::MessageRepo;
use bs_db::DbPool;

use crate::auth::{parse_auth_command, AuthManager};
use crate::client::TargetClient;
use crate::echo::EchoTracker;
use crate::events::GatewayEvent;
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::sakoya_link::TargetLink;

/// Delay before a freshly reconnected OneBot target resumes
/// forwarding; frameworks need a beat after re-registration.
const RESUME_DELAY: Duration = Duration::from_secs(5);

/// Wait before retrying a target whose very first dial failed, so the
/// client finishes its own registration first.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Log snippet cap for frame payloads (base64 images would otherwise
/// flood the log).
const LOG_SNIPPET_LEN: usize = 1000;
const FAILURE_SNIPPET_LEN: usize = 200;

/// Outbound frames toward the bot client.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Shared services handed to every proxy connection.
#[derive(Clone, Debug)]
pub struct ProxyContext {
    pub pool: DbPool,
    pub auth: Arc<AuthManager>,
    pub global: Arc<GlobalConfig>,
    pub event_tx: broadcast::Sender<GatewayEvent>,
}

/// Live state of one target slot, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub index: usize,
    pub url: String,
    pub sakoya_protocol: bool,
    pub disabled: bool,
    pub connected: bool,
}

/// Live state of one proxy lane, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connection_id: ConnectionId,
    pub client_attached: bool,
    pub self_id: Option<i64>,
    pub targets: Vec<TargetStatus>,
}

/// A bot client attached to its configured path, proxied to targets.
#[derive(Debug)]
pub struct ProxyConnection {
    connection_id: ConnectionId,
    ctx: ProxyContext,
    client_tx: mpsc::UnboundedSender<ClientFrame>,
    client_headers: HashMap<String, String>,
    config: RwLock<ConnectionConfig>,
    /// The client's first frame (its lifecycle registration), replayed
    /// to targets after reconnects so frameworks re-register the bot.
    first_frame: RwLock<Option<String>>,
    self_id: RwLock<Option<i64>>,
    /// Outbound senders per target, index 0 holding target 1.
    targets: RwLock<Vec<Option<mpsc::UnboundedSender<String>>>>,
    /// Generation token for the current set of target tasks. Replaced
    /// (and the old one cancelled) on reload.
    target_gen: RwLock<CancellationToken>,
    echo: EchoTracker,
    cancel: CancellationToken,
    reloading: AtomicBool,
}

impl ProxyConnection {
    pub fn new(
        connection_id: ConnectionId,
        config: ConnectionConfig,
        client_headers: HashMap<String, String>,
        client_tx: mpsc::UnboundedSender<ClientFrame>,
        ctx: ProxyContext,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection_id,
            ctx,
            client_tx,
            client_headers,
            config: RwLock::new(config),
            first_frame: RwLock::new(None),
            self_id: RwLock::new(None),
            targets: RwLock::new(Vec::new()),
            target_gen: RwLock::new(cancel.child_token()),
            echo: EchoTracker::new(),
            cancel,
            reloading: AtomicBool::new(false),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn is_client_alive(&self) -> bool {
        !self.client_tx.is_closed()
    }

    fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::SeqCst)
    }

    /// Begin proxying: record the client's first frame, dial every
    /// enabled target, then process that frame like any other.
    pub async fn start(self: &Arc<Self>, first_frame: String) {
        *self.first_frame.write().await = Some(first_frame.clone());
        let _ = self.ctx.event_tx.send(GatewayEvent::ClientConnected {
            connection_id: self.connection_id.clone(),
        });

        self.spawn_targets(false).await;
        self.handle_client_frame(&first_frame).await;
    }

    /// Ask the client to close.
    pub fn close_client(&self, code: u16, reason: &str) {
        let _ = self.client_tx.send(ClientFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Stop all target tasks. Called when the client goes away or the
    /// gateway shuts down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Client socket closed: tear down targets and announce it.
    pub fn client_disconnected(&self) {
        self.shutdown();
        let _ = self.ctx.event_tx.send(GatewayEvent::ClientDisconnected {
            connection_id: self.connection_id.clone(),
        });
    }

    /// Swap in a new target endpoint set without touching the client.
    pub async fn reload_targets(self: &Arc<Self>, new_config: ConnectionConfig) {
        tracing::info!(connection_id = %self.connection_id, "Reloading target endpoints");
        self.reloading.store(true, Ordering::SeqCst);

        let old_gen = {
            let mut gen = self.target_gen.write().await;
            let old = gen.clone();
            *gen = self.cancel.child_token();
            old
        };
        old_gen.cancel();

        *self.config.write().await = new_config;
        self.spawn_targets(true).await;

        self.reloading.store(false, Ordering::SeqCst);
        let _ = self.ctx.event_tx.send(GatewayEvent::TargetsReloaded {
            connection_id: self.connection_id.clone(),
        });
        tracing::info!(connection_id = %self.connection_id, "Target endpoints reloaded");
    }

    /// Snapshot for the admin API.
    pub async fn status(&self) -> ConnectionStatus {
        let config = self.config.read().await;
        let slots = self.targets.read().await;
        let targets = config
            .target_endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| TargetStatus {
                index: i + 1,
                url: endpoint.url().to_string(),
                sakoya_protocol: endpoint.sakoya_protocol(),
                disabled: endpoint.disabled(),
                connected: slots.get(i).map(Option::is_some).unwrap_or(false),
            })
            .collect();

        ConnectionStatus {
            connection_id: self.connection_id.clone(),
            client_attached: self.is_client_alive(),
            self_id: *self.self_id.read().await,
            targets,
        }
    }

    // ---- target task management ----

    /// Dial every enabled target and spawn its pump task. Targets that
    /// fail their first dial get a delayed background reconnect.
    async fn spawn_targets(self: &Arc<Self>, replay: bool) {
        let config = self.config.read().await.clone();
        let gen = self.target_gen.read().await.clone();
        *self.targets.write().await = (0..config.target_endpoints.len()).map(|_| None).collect();

        for (target_index, endpoint) in config.enabled_targets() {
            let endpoint = endpoint.clone();
            let client = TargetClient::new(
                self.connection_id.clone(),
                target_index,
                endpoint.clone(),
                self.client_headers.clone(),
            );

            match client.connect().await {
                Ok(stream) => {
                    let link = TargetLink::for_endpoint(stream, &endpoint);
                    // Register the outbound channel before spawning so
                    // frames fanned out right after this call are not
                    // lost to task-startup timing.
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.set_target_sender(target_index, tx.clone()).await;
                    let conn = Arc::clone(self);
                    let gen = gen.clone();
                    tokio::spawn(async move {
                        conn.run_target(target_index, endpoint, client, link, gen, replay, Some((tx, rx)))
                            .await;
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %self.connection_id,
                        target_index,
                        error = %e,
                        "Initial target connection failed, scheduling reconnect",
                    );
                    let conn = Arc::clone(self);
                    let gen = gen.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = gen.cancelled() => return,
                            _ = tokio::time::sleep(INITIAL_RETRY_DELAY) => {}
                        }
                        let reconnect_config = ReconnectConfig::default();
                        if let Some(stream) = reconnect_loop(&client, &reconnect_config, &gen).await
                        {
                            let link = TargetLink::for_endpoint(stream, &endpoint);
                            conn.run_target(target_index, endpoint, client, link, gen, true, None)
                                .await;
                        }
                    });
                }
            }
        }
    }

    /// Long-lived task for one target: replay registration if needed,
    /// pump frames both ways, reconnect when the link drops.
    #[allow(clippy::too_many_arguments)]
    async fn run_target(
        self: Arc<Self>,
        target_index: usize,
        endpoint: TargetEndpoint,
        client: TargetClient,
        mut link: TargetLink,
        gen: CancellationToken,
        mut replay: bool,
        mut channel: Option<(mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>)>,
    ) {
        let reconnect_config = ReconnectConfig::default();

        loop {
            if replay {
                self.replay_first_frame(&mut link, &endpoint, target_index).await;
                if !endpoint.sakoya_protocol() {
                    tokio::select! {
                        _ = gen.cancelled() => {
                            link.close().await;
                            return;
                        }
                        _ = tokio::time::sleep(RESUME_DELAY) => {}
                    }
                }
            }

            let (tx, mut rx) = match channel.take() {
                // Pre-registered by spawn_targets.
                Some(pair) => pair,
                None => {
                    let (tx, rx) = mpsc::unbounded_channel::<String>();
                    self.set_target_sender(target_index, tx.clone()).await;
                    (tx, rx)
                }
            };
            let _ = self.ctx.event_tx.send(GatewayEvent::TargetConnected {
                connection_id: self.connection_id.clone(),
                target_index,
            });

            loop {
                tokio::select! {
                    _ = gen.cancelled() => {
                        link.close().await;
                        self.clear_target_sender(target_index, &tx).await;
                        return;
                    }
                    outbound = rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = link.send(&text).await {
                                tracing::warn!(
                                    connection_id = %self.connection_id,
                                    target_index,
                                    error = %e,
                                    "Send to target failed",
                                );
                                break;
                            }
                        }
                        // All senders gone: nothing can feed this link.
                        None => {
                            link.close().await;
                            return;
                        }
                    },
                    inbound = link.recv() => match inbound {
                        Some(Ok(text)) => self.handle_target_frame(text, target_index).await,
                        Some(Err(e)) => {
                            tracing::warn!(
                                connection_id = %self.connection_id,
                                target_index,
                                error = %e,
                                "Target receive error",
                            );
                            break;
                        }
                        None => {
                            tracing::info!(
                                connection_id = %self.connection_id,
                                target_index,
                                "Target link closed",
                            );
                            break;
                        }
                    },
                }
            }

            self.clear_target_sender(target_index, &tx).await;
            let _ = self.ctx.event_tx.send(GatewayEvent::TargetDisconnected {
                connection_id: self.connection_id.clone(),
                target_index,
            });

            if gen.is_cancelled() || self.is_reloading() || !self.is_client_alive() {
                return;
            }

            match reconnect_loop(&client, &reconnect_config, &gen).await {
                Some(stream) => {
                    link = TargetLink::for_endpoint(stream, &endpoint);
                    replay = true;
                }
                None => return,
            }
        }
    }

    /// Re-send the client's registration frame to one target.
    async fn replay_first_frame(
        &self,
        link: &mut TargetLink,
        endpoint: &TargetEndpoint,
        target_index: usize,
    ) {
        let Some(first) = self.first_frame.read().await.clone() else {
            return;
        };
        if endpoint.sakoya_protocol() {
            let skip = serde_json::from_str::<Value>(&first)
                .map(|v| skip_for_sakoya(&v))
                .unwrap_or(false);
            if skip {
                return;
            }
        }
        if let Err(e) = link.send(&first).await {
            tracing::warn!(
                connection_id = %self.connection_id,
                target_index,
                error = %e,
                "Failed to replay registration frame",
            );
        }
    }

    async fn set_target_sender(&self, target_index: usize, sender: mpsc::UnboundedSender<String>) {
        let mut slots = self.targets.write().await;
        if let Some(slot) = slots.get_mut(target_index - 1) {
            *slot = Some(sender);
        }
    }

    /// Clear a slot only if it still holds our channel; a reload may
    /// already have installed a replacement.
    async fn clear_target_sender(&self, target_index: usize, ours: &mpsc::UnboundedSender<String>) {
        let mut slots = self.targets.write().await;
        if let Some(slot) = slots.get_mut(target_index - 1) {
            if slot.as_ref().map(|tx| tx.same_channel(ours)).unwrap_or(false) {
                *slot = None;
            }
        }
    }

    // ---- frame processing ----

    /// Process one frame from the bot client.
    pub async fn handle_client_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    frame = %snippet(text, LOG_SNIPPET_LEN),
                    "Non-JSON frame from client",
                );
                return;
            }
        };

        self.track_self_id(&value).await;

        match classify(&value) {
            FrameKind::ApiResponse => self.handle_client_api_response(value).await,
            _ => self.handle_client_event(value).await,
        }
    }

    /// Clients report `self_id` on every frame and may switch accounts
    /// mid-session, which frameworks cannot follow.
    async fn track_self_id(&self, value: &Value) {
        let Some(id) = EventView(value).self_id() else {
            return;
        };
        let mut current = self.self_id.write().await;
        match *current {
            Some(previous) if previous != id => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    previous,
                    new = id,
                    "Client switched accounts; restart this connection",
                );
                *current = Some(id);
            }
            Some(_) => {}
            None => *current = Some(id),
        }
    }

    /// Route an API response back to the target that issued the call.
    async fn handle_client_api_response(&self, value: Value) {
        let Some(response) = ApiResponse::from_value(&value) else {
            return;
        };
        let echo = echo_str(&value);
        let claimed = echo.as_deref().and_then(|e| self.echo.take(e));

        if response.is_ok() {
            if let Some(entry) = &claimed {
                let self_id = *self.self_id.read().await;
                if let Some(event) =
                    message_sent_event(&entry.payload, self_id, response.message_id())
                {
                    self.persist(Direction::Send, &event).await;
                }
            }
        } else if let Some(entry) = &claimed {
            tracing::warn!(
                connection_id = %self.connection_id,
                target_index = entry.target_index,
                request = %snippet(&entry.payload.to_string(), FAILURE_SNIPPET_LEN),
                status = %response.status,
                retcode = response.retcode,
                "API call failed",
            );
            let _ = self.ctx.event_tx.send(GatewayEvent::ApiCallFailed {
                connection_id: self.connection_id.clone(),
                target_index: entry.target_index,
                echo: echo.clone().unwrap_or_default(),
            });
        }

        match claimed {
            Some(entry) => {
                let slots = self.targets.read().await;
                match slots.get(entry.target_index - 1).and_then(Option::as_ref) {
                    Some(tx) => {
                        let _ = tx.send(value.to_string());
                    }
                    None => tracing::debug!(
                        connection_id = %self.connection_id,
                        target_index = entry.target_index,
                        "Issuing target is offline, response dropped",
                    ),
                }
            }
            None => tracing::debug!(
                connection_id = %self.connection_id,
                "Response without a tracked echo dropped",
            ),
        }
    }

    /// Gate, persist, and fan an event out to all eligible targets.
    async fn handle_client_event(&self, value: Value) {
        let view = EventView(&value);
        if view.is_message() {
            let bot_id = view
                .self_id()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let prefix = self.ctx.global.command_prefix.clone();

            if let Some(command) = parse_auth_command(&view.raw_message(), &prefix) {
                let reply = self.ctx.auth.handle_command(&bot_id, command, &prefix).await;
                match ApiCall::reply_to(&view, &reply) {
                    Some(call) => match serde_json::to_string(&call) {
                        Ok(json) => {
                            let _ = self.client_tx.send(ClientFrame::Text(json));
                        }
                        Err(e) => tracing::error!(
                            connection_id = %self.connection_id,
                            error = %e,
                            "Failed to serialize auth reply",
                        ),
                    },
                    None => tracing::warn!(
                        connection_id = %self.connection_id,
                        "Auth command event has no addressee",
                    ),
                }
                return;
            }

            if self.ctx.auth.enabled().await && !self.ctx.auth.is_authenticated(&bot_id).await {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    bot_id = %bot_id,
                    "Unauthenticated bot, message not forwarded",
                );
                return;
            }

            self.persist(Direction::Recv, &value).await;
        }

        let withhold_from_sakoya = skip_for_sakoya(&value);
        let payload = value.to_string();
        let config = self.config.read().await;
        let slots = self.targets.read().await;

        for (slot_index, sender) in slots.iter().enumerate() {
            let Some(endpoint) = config.target_endpoints.get(slot_index) else {
                continue;
            };
            if endpoint.disabled() {
                continue;
            }
            if endpoint.sakoya_protocol() && withhold_from_sakoya {
                tracing::trace!(
                    connection_id = %self.connection_id,
                    target_index = slot_index + 1,
                    "Frame withheld from Sakoya target",
                );
                continue;
            }
            if let Some(tx) = sender {
                let _ = tx.send(payload.clone());
            }
        }
    }

    /// Process one frame from a target: track its echo, then forward
    /// it to the client.
    pub(crate) async fn handle_target_frame(&self, text: String, target_index: usize) {
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    target_index,
                    error = %e,
                    frame = %snippet(&text, LOG_SNIPPET_LEN),
                    "Non-JSON frame from target",
                );
                return;
            }
        };

        match echo_str(&value) {
            Some(echo) => {
                tracing::trace!(
                    connection_id = %self.connection_id,
                    target_index,
                    echo = %echo,
                    cached = self.echo.len(),
                    "API call registered",
                );
                self.echo.register(target_index, echo, value);
            }
            None => {
                // Frameworks that skip echo correlation: persist their
                // send calls directly since no response will arrive.
                let self_id = *self.self_id.read().await;
                if let Some(event) = message_sent_event(&value, self_id, None) {
                    self.persist(Direction::Send, &event).await;
                }
            }
        }

        if self.client_tx.send(ClientFrame::Text(text)).is_err() {
            tracing::debug!(
                connection_id = %self.connection_id,
                target_index,
                "Client channel closed, frame dropped",
            );
        }
    }

    async fn persist(&self, direction: Direction, event: &Value) {
        let row = NewMessage::from_event(&self.connection_id, direction, event);
        if let Err(e) = MessageRepo::insert(&self.ctx.pool, &row).await {
            tracing::error!(
                connection_id = %self.connection_id,
                error = %e,
                "Failed to persist message",
            );
        }
    }
}

/// Char-safe log snippet with a length marker for truncated frames.
fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...[total length: {}]", text.len())
}
