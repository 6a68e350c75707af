//! Target links, including Sakoya protocol translation.
//!
//! [`TargetLink`] wraps an established target stream. OneBot targets
//! relay frames verbatim; Sakoya targets translate in both directions
//! and keep a short history of message segments so quoted images can
//! be re-attached for backends that need the full picture context.

use std::collections::{HashMap, VecDeque};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use bs_core::config::TargetEndpoint;
use bs_core::onebot::event::HANDSHAKE_ACTIONS;
use bs_core::sakoya::convert::{
    event_to_message_receive, message_receive_to_event, message_send_to_api_call,
    send_call_to_message_send,
};
use bs_core::sakoya::{extract_bot_id, MessageReceive, MessageSend};

use crate::client::WsStream;

/// Messages recalled for quoted-image completion.
const REPLY_CACHE_CAPACITY: usize = 100;

/// A live link to one target endpoint.
pub enum TargetLink {
    OneBot(WsStream),
    Sakoya(Box<SakoyaLink>),
}

impl TargetLink {
    /// Wrap a stream according to the endpoint's protocol.
    pub fn for_endpoint(stream: WsStream, endpoint: &TargetEndpoint) -> Self {
        if endpoint.sakoya_protocol() {
            let bot_id = bot_id_from_url(endpoint.url());
            TargetLink::Sakoya(Box::new(SakoyaLink::new(stream, bot_id)))
        } else {
            TargetLink::OneBot(stream)
        }
    }

    /// Send a client-origin OneBot frame toward the target.
    pub async fn send(&mut self, text: &str) -> Result<(), WsError> {
        match self {
            TargetLink::OneBot(stream) => stream.send(Message::Text(text.to_string())).await,
            TargetLink::Sakoya(link) => link.send(text).await,
        }
    }

    /// Receive the next frame from the target, already translated to
    /// OneBot shape. `None` means the link closed.
    pub async fn recv(&mut self) -> Option<Result<String, WsError>> {
        let translate = matches!(self, TargetLink::Sakoya(_));
        let stream = match self {
            TargetLink::OneBot(stream) => stream,
            TargetLink::Sakoya(link) => &mut link.stream,
        };

        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => {
                    let text = if translate { translate_inbound(&text) } else { text };
                    return Some(Ok(text));
                }
                Ok(Message::Binary(bytes)) => {
                    let raw = String::from_utf8_lossy(&bytes).into_owned();
                    let raw = if translate { translate_inbound(&raw) } else { raw };
                    return Some(Ok(raw));
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Target WebSocket closed");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }

    pub async fn close(&mut self) {
        let stream = match self {
            TargetLink::OneBot(stream) => stream,
            TargetLink::Sakoya(link) => &mut link.stream,
        };
        let _ = stream.close(None).await;
    }
}

/// Wrapper translating between OneBot and Sakoya on one stream.
pub struct SakoyaLink {
    stream: WsStream,
    bot_id: String,
    reply_cache: ReplyCache,
}

impl SakoyaLink {
    pub fn new(stream: WsStream, bot_id: String) -> Self {
        Self {
            stream,
            bot_id,
            reply_cache: ReplyCache::new(REPLY_CACHE_CAPACITY),
        }
    }

    async fn send(&mut self, text: &str) -> Result<(), WsError> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                tracing::debug!(bot_id = %self.bot_id, "Non-JSON frame relayed to Sakoya target");
                return self.stream.send(Message::Binary(text.as_bytes().to_vec())).await;
            }
        };

        match convert_outbound(&value, &self.bot_id, &mut self.reply_cache) {
            Outbound::Drop => Ok(()),
            Outbound::Passthrough => {
                self.stream
                    .send(Message::Binary(text.as_bytes().to_vec()))
                    .await
            }
            Outbound::Frame(bytes) => self.stream.send(Message::Binary(bytes)).await,
        }
    }
}

/// Outcome of outbound Sakoya conversion.
#[derive(Debug)]
pub enum Outbound {
    /// Frame is meaningless to a Sakoya backend; swallow it.
    Drop,
    /// Relay the original frame unchanged.
    Passthrough,
    /// Send this converted frame instead.
    Frame(Vec<u8>),
}

/// Decide how a client-origin frame crosses into the Sakoya protocol.
pub fn convert_outbound(value: &Value, bot_id: &str, reply_cache: &mut ReplyCache) -> Outbound {
    // API responses relay verbatim; the backend correlates them itself.
    if value.get("echo").is_some() || value.get("retcode").is_some() || value.get("status").is_some()
    {
        return Outbound::Passthrough;
    }

    match value.get("post_type").and_then(Value::as_str) {
        Some("meta_event") => return Outbound::Drop,
        Some("message") => {
            let mut event = value.clone();
            reply_cache.process(&mut event);
            return match event_to_message_receive(&event, bot_id) {
                Some(mr) => match serde_json::to_vec(&mr) {
                    Ok(bytes) => Outbound::Frame(bytes),
                    Err(e) => {
                        tracing::warn!(error = %e, "Sakoya conversion failed, relaying original");
                        Outbound::Passthrough
                    }
                },
                None => Outbound::Passthrough,
            };
        }
        _ => {}
    }

    let action = value.get("action").and_then(Value::as_str).unwrap_or("");
    if HANDSHAKE_ACTIONS.contains(&action) {
        return Outbound::Passthrough;
    }
    if action.contains("send") && action.contains("_msg") {
        let ms = send_call_to_message_send(value);
        return match serde_json::to_vec(&ms) {
            Ok(bytes) => Outbound::Frame(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Sakoya send conversion failed, relaying original");
                Outbound::Passthrough
            }
        };
    }
    Outbound::Passthrough
}

/// Translate a backend-origin frame to OneBot shape.
///
/// `MessageSend` becomes a send-API call, a stray `MessageReceive`
/// becomes a message event, anything else is returned unchanged.
pub fn translate_inbound(raw: &str) -> String {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return raw.to_string(),
    };

    if value.get("target_type").is_some() || value.get("target_id").is_some() {
        if let Ok(ms) = serde_json::from_value::<MessageSend>(value.clone()) {
            return message_send_to_api_call(&ms).to_string();
        }
    }

    if value.get("content").is_some() && value.get("bot_id").is_some() {
        if let Ok(mr) = serde_json::from_value::<MessageReceive>(value) {
            return message_receive_to_event(&mr).to_string();
        }
    }

    raw.to_string()
}

/// The `bot_id` Sakoya backends expect, taken from the `/ws/{bot_id}`
/// segment of the target URL. Defaults to `Bot`.
pub fn bot_id_from_url(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .unwrap_or(url);
    let path = match without_scheme.find('/') {
        Some(pos) => &without_scheme[pos..],
        None => "/",
    };
    extract_bot_id(path).unwrap_or("Bot").to_string()
}

/// Bounded message history for quoted-image completion.
pub struct ReplyCache {
    entries: HashMap<String, Vec<Value>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ReplyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Record the event's segments and, when it quotes an earlier
    /// message, splice that message's images to the front (replacing
    /// the reply segment).
    pub fn process(&mut self, event: &mut Value) {
        let message_id = event
            .get("message_id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let segments: Vec<Value> = event
            .get("message")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if !message_id.is_empty() && message_id != "null" {
            if self.entries.insert(message_id.clone(), segments.clone()).is_none() {
                self.order.push_back(message_id);
                if self.order.len() > self.capacity {
                    if let Some(oldest) = self.order.pop_front() {
                        self.entries.remove(&oldest);
                    }
                }
            }
        }

        let reply_id = segments.iter().find_map(|seg| {
            if seg.get("type").and_then(Value::as_str) == Some("reply") {
                seg.get("data")
                    .and_then(|d| d.get("id"))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            } else {
                None
            }
        });
        let Some(reply_id) = reply_id else { return };

        let Some(quoted) = self.entries.get(&reply_id) else {
            tracing::debug!(reply_id = %reply_id, "Quoted message not in cache");
            return;
        };

        let images: Vec<Value> = quoted
            .iter()
            .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("image"))
            .map(|seg| {
                let url = seg
                    .get("data")
                    .and_then(|d| d.get("url"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if url.is_empty() {
                    seg.clone()
                } else {
                    serde_json::json!({ "type": "image", "data": { "url": url } })
                }
            })
            .collect();
        if images.is_empty() {
            return;
        }

        let mut rebuilt = images;
        rebuilt.extend(
            segments
                .into_iter()
                .filter(|seg| seg.get("type").and_then(Value::as_str) != Some("reply")),
        );
        event["message"] = Value::Array(rebuilt);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bot_id_extracted_from_sakoya_url() {
        assert_eq!(bot_id_from_url("ws://127.0.0.1:8765/ws/NoneBot2"), "NoneBot2");
        assert_eq!(bot_id_from_url("wss://host/ws/Bot"), "Bot");
        assert_eq!(bot_id_from_url("ws://127.0.0.1:8765/other"), "Bot");
        assert_eq!(bot_id_from_url("ws://127.0.0.1:8765"), "Bot");
    }

    #[test]
    fn outbound_api_response_passes_through() {
        let mut cache = ReplyCache::new(10);
        let value = json!({"status": "ok", "retcode": 0, "echo": "e"});
        assert!(matches!(
            convert_outbound(&value, "Bot", &mut cache),
            Outbound::Passthrough
        ));
    }

    #[test]
    fn outbound_meta_event_is_dropped() {
        let mut cache = ReplyCache::new(10);
        let value = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        assert!(matches!(
            convert_outbound(&value, "Bot", &mut cache),
            Outbound::Drop
        ));
    }

    #[test]
    fn outbound_message_event_converts() {
        let mut cache = ReplyCache::new(10);
        let value = json!({
            "post_type": "message",
            "message_type": "private",
            "message_id": 1,
            "user_id": 5,
            "self_id": 6,
            "message": [{"type": "text", "data": {"text": "hi"}}]
        });
        match convert_outbound(&value, "NoneBot2", &mut cache) {
            Outbound::Frame(bytes) => {
                let frame: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(frame["bot_id"], "NoneBot2");
                assert_eq!(frame["user_type"], "direct");
                assert_eq!(frame["content"][0]["data"], "hi");
            }
            other => panic!("Expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn outbound_handshake_action_passes_through() {
        let mut cache = ReplyCache::new(10);
        let value = json!({"action": "get_status", "params": {}});
        assert!(matches!(
            convert_outbound(&value, "Bot", &mut cache),
            Outbound::Passthrough
        ));
    }

    #[test]
    fn outbound_send_call_converts() {
        let mut cache = ReplyCache::new(10);
        let value = json!({
            "action": "send_group_msg",
            "params": {"group_id": 9, "message": [{"type": "text", "data": {"text": "x"}}]}
        });
        match convert_outbound(&value, "Bot", &mut cache) {
            Outbound::Frame(bytes) => {
                let frame: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(frame["target_type"], "group");
                assert_eq!(frame["target_id"], "9");
            }
            other => panic!("Expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn outbound_query_call_passes_through() {
        let mut cache = ReplyCache::new(10);
        let value = json!({"action": "get_group_member_list", "params": {"group_id": 9}});
        assert!(matches!(
            convert_outbound(&value, "Bot", &mut cache),
            Outbound::Passthrough
        ));
    }

    #[test]
    fn inbound_message_send_becomes_api_call() {
        let raw = json!({
            "bot_id": "Bot",
            "target_type": "group",
            "target_id": "100",
            "content": [{"type": "text", "data": "result"}]
        })
        .to_string();
        let translated: Value = serde_json::from_str(&translate_inbound(&raw)).unwrap();
        assert_eq!(translated["action"], "send_group_msg");
        assert_eq!(translated["params"]["group_id"], 100);
    }

    #[test]
    fn inbound_non_json_passes_through() {
        assert_eq!(translate_inbound("plain text"), "plain text");
    }

    #[test]
    fn inbound_unrelated_json_passes_through() {
        let raw = r#"{"hello":"world"}"#;
        assert_eq!(translate_inbound(raw), raw);
    }

    #[test]
    fn reply_cache_splices_quoted_images() {
        let mut cache = ReplyCache::new(10);

        let mut original = json!({
            "message_id": 1,
            "message": [
                {"type": "text", "data": {"text": "look"}},
                {"type": "image", "data": {"file": "a.png", "url": "http://img/a.png"}}
            ]
        });
        cache.process(&mut original);

        let mut reply = json!({
            "message_id": 2,
            "message": [
                {"type": "reply", "data": {"id": 1}},
                {"type": "text", "data": {"text": "rate this"}}
            ]
        });
        cache.process(&mut reply);

        let segments = reply["message"].as_array().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0]["type"], "image");
        assert_eq!(segments[0]["data"]["url"], "http://img/a.png");
        assert_eq!(segments[1]["type"], "text");
    }

    #[test]
    fn reply_cache_leaves_unknown_quotes_alone() {
        let mut cache = ReplyCache::new(10);
        let mut reply = json!({
            "message_id": 2,
            "message": [
                {"type": "reply", "data": {"id": "999"}},
                {"type": "text", "data": {"text": "?"}}
            ]
        });
        cache.process(&mut reply);
        // Unchanged: reply segment still present.
        assert_eq!(reply["message"][0]["type"], "reply");
    }

    #[test]
    fn reply_cache_evicts_oldest_past_capacity() {
        let mut cache = ReplyCache::new(2);
        for id in 1..=3 {
            let mut event = json!({
                "message_id": id,
                "message": [{"type": "text", "data": {"text": "m"}}]
            });
            cache.process(&mut event);
        }
        assert_eq!(cache.len(), 2);
    }
}
