//! Frame classification and typed views over OneBot v11 JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::onebot::segment::{render_raw_message, MessageSegment};

/// Actions that belong to the registration handshake between a bot
/// client and a framework. Sakoya backends never see these.
pub const HANDSHAKE_ACTIONS: &[&str] = &[
    "lifecycle",
    "_connect",
    "get_login_info",
    "get_status",
    "get_version_info",
];

/// The three OneBot frame shapes, plus everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// `echo` plus `status`/`retcode`: a response to an API call.
    ApiResponse,
    /// `action`: an API call toward the bot client.
    ApiCall,
    /// `post_type`: an event pushed by the bot client.
    Event,
    Other,
}

/// Classify a parsed frame by its discriminating fields.
pub fn classify(value: &Value) -> FrameKind {
    if value.get("echo").is_some()
        && (value.get("status").is_some() || value.get("retcode").is_some())
    {
        FrameKind::ApiResponse
    } else if value.get("action").is_some() {
        FrameKind::ApiCall
    } else if value.get("post_type").is_some() {
        FrameKind::Event
    } else {
        FrameKind::Other
    }
}

/// Should this client frame be withheld from Sakoya targets?
///
/// Sakoya backends only consume message events and send-API traffic;
/// meta events and handshake actions confuse them.
pub fn skip_for_sakoya(value: &Value) -> bool {
    if value.get("post_type").and_then(Value::as_str) == Some("meta_event") {
        return true;
    }
    match value.get("action").and_then(Value::as_str) {
        Some(action) => HANDSHAKE_ACTIONS.contains(&action),
        None => false,
    }
}

/// The `echo` correlation token, normalized to a string.
pub fn echo_str(value: &Value) -> Option<String> {
    match value.get("echo") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// A response to an OneBot API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub echo: Value,
}

impl ApiResponse {
    pub fn from_value(value: &Value) -> Option<Self> {
        if classify(value) != FrameKind::ApiResponse {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok" && self.retcode == 0
    }

    /// `data.message_id` when the response carries one (send APIs do).
    pub fn message_id(&self) -> Option<i64> {
        self.data.get("message_id").and_then(Value::as_i64)
    }
}

/// An API call toward the bot client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCall {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub echo: Value,
}

impl ApiCall {
    /// Whether this call sends a message (vs. a query or control call).
    pub fn is_send(&self) -> bool {
        self.action.contains("send")
    }

    /// Build a reply call addressed back at the source of `event`:
    /// `send_group_msg` for group messages, `send_private_msg` otherwise.
    ///
    /// Returns `None` when the event has no usable addressee.
    pub fn reply_to(event: &EventView<'_>, text: &str) -> Option<Self> {
        let message = serde_json::json!([MessageSegment::text(text)]);
        let echo = Value::String(format!("bs-gw-{}", uuid::Uuid::new_v4().simple()));

        if event.message_type() == Some("group") {
            let group_id = event.group_id()?;
            Some(Self {
                action: "send_group_msg".to_string(),
                params: serde_json::json!({ "group_id": group_id, "message": message }),
                echo,
            })
        } else {
            let user_id = event.user_id()?;
            Some(Self {
                action: "send_private_msg".to_string(),
                params: serde_json::json!({ "user_id": user_id, "message": message }),
                echo,
            })
        }
    }
}

/// Re-materialize a successful send-API call as a `message_sent` event.
///
/// Persisted alongside received traffic so outbound messages appear in
/// history with the same shape as inbound ones.
pub fn message_sent_event(call: &Value, self_id: Option<i64>, message_id: Option<i64>) -> Option<Value> {
    let action = call.get("action").and_then(Value::as_str)?;
    if !action.contains("send") {
        return None;
    }

    let mut params = call.get("params").cloned().unwrap_or(Value::Null);
    let obj = params.as_object_mut()?;

    if let Some(id) = self_id {
        obj.insert("self_id".to_string(), Value::from(id));
    }
    if !obj.contains_key("sender") {
        obj.insert(
            "sender".to_string(),
            serde_json::json!({ "user_id": self_id, "nickname": "BS Bot Send" }),
        );
    }
    obj.insert("post_type".to_string(), Value::from("message_sent"));
    if let Some(id) = message_id {
        obj.insert("message_id".to_string(), Value::from(id));
    }

    let raw = match obj.get("message").and_then(Value::as_array) {
        Some(segments) => render_raw_message(segments),
        None => obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };
    obj.insert("raw_message".to_string(), Value::from(raw));

    Some(params)
}

/// Borrowed accessor view over an event frame.
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a>(pub &'a Value);

impl<'a> EventView<'a> {
    pub fn post_type(&self) -> Option<&'a str> {
        self.0.get("post_type").and_then(Value::as_str)
    }

    pub fn is_message(&self) -> bool {
        self.post_type() == Some("message")
    }

    pub fn message_type(&self) -> Option<&'a str> {
        self.0.get("message_type").and_then(Value::as_str)
    }

    fn id_field(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn self_id(&self) -> Option<i64> {
        self.id_field("self_id")
    }

    pub fn user_id(&self) -> Option<i64> {
        self.id_field("user_id")
    }

    pub fn group_id(&self) -> Option<i64> {
        self.id_field("group_id")
    }

    pub fn message_id(&self) -> Option<i64> {
        self.id_field("message_id")
    }

    pub fn segments(&self) -> Option<&'a Vec<Value>> {
        self.0.get("message").and_then(Value::as_array)
    }

    /// The flat message text: the `raw_message` field when present,
    /// otherwise rendered from the segment array.
    pub fn raw_message(&self) -> String {
        if let Some(raw) = self.0.get("raw_message").and_then(Value::as_str) {
            return raw.to_string();
        }
        match self.segments() {
            Some(segments) => render_raw_message(segments),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_api_response() {
        let value = json!({"status": "ok", "retcode": 0, "data": null, "echo": "e1"});
        assert_eq!(classify(&value), FrameKind::ApiResponse);
    }

    #[test]
    fn classify_api_call() {
        let value = json!({"action": "send_group_msg", "params": {}, "echo": "e2"});
        assert_eq!(classify(&value), FrameKind::ApiCall);
    }

    #[test]
    fn classify_event() {
        let value = json!({"post_type": "message", "message_type": "group"});
        assert_eq!(classify(&value), FrameKind::Event);
    }

    #[test]
    fn classify_other() {
        assert_eq!(classify(&json!({"hello": 1})), FrameKind::Other);
    }

    #[test]
    fn api_response_success_check() {
        let ok = ApiResponse::from_value(&json!({
            "status": "ok", "retcode": 0, "data": {"message_id": 99}, "echo": "e"
        }))
        .unwrap();
        assert!(ok.is_ok());
        assert_eq!(ok.message_id(), Some(99));

        let failed = ApiResponse::from_value(&json!({
            "status": "failed", "retcode": 1400, "data": null, "echo": "e"
        }))
        .unwrap();
        assert!(!failed.is_ok());
    }

    #[test]
    fn echo_str_normalizes_numbers() {
        assert_eq!(echo_str(&json!({"echo": "abc"})).as_deref(), Some("abc"));
        assert_eq!(echo_str(&json!({"echo": 42})).as_deref(), Some("42"));
        assert_eq!(echo_str(&json!({"echo": null})), None);
        assert_eq!(echo_str(&json!({"echo": ""})), None);
        assert_eq!(echo_str(&json!({})), None);
    }

    #[test]
    fn skip_for_sakoya_meta_and_handshake() {
        assert!(skip_for_sakoya(&json!({"post_type": "meta_event", "meta_event_type": "heartbeat"})));
        assert!(skip_for_sakoya(&json!({"action": "get_status"})));
        assert!(!skip_for_sakoya(&json!({"post_type": "message"})));
        assert!(!skip_for_sakoya(&json!({"action": "send_group_msg"})));
    }

    #[test]
    fn event_view_id_fields_accept_strings() {
        let value = json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": "10001",
            "user_id": 20002,
            "group_id": 30003
        });
        let view = EventView(&value);
        assert_eq!(view.self_id(), Some(10001));
        assert_eq!(view.user_id(), Some(20002));
        assert_eq!(view.group_id(), Some(30003));
    }

    #[test]
    fn event_view_raw_message_falls_back_to_segments() {
        let value = json!({
            "post_type": "message",
            "message": [{"type": "text", "data": {"text": "ping"}}]
        });
        assert_eq!(EventView(&value).raw_message(), "ping");
    }

    #[test]
    fn reply_to_group_event() {
        let value = json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 123,
            "user_id": 456
        });
        let call = ApiCall::reply_to(&EventView(&value), "done").unwrap();
        assert_eq!(call.action, "send_group_msg");
        assert_eq!(call.params["group_id"], 123);
        assert_eq!(call.params["message"][0]["data"]["text"], "done");
        assert!(call.echo.as_str().unwrap().starts_with("bs-gw-"));
    }

    #[test]
    fn reply_to_private_event() {
        let value = json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": 456
        });
        let call = ApiCall::reply_to(&EventView(&value), "hi").unwrap();
        assert_eq!(call.action, "send_private_msg");
        assert_eq!(call.params["user_id"], 456);
    }

    #[test]
    fn message_sent_event_from_send_call() {
        let call = json!({
            "action": "send_group_msg",
            "params": {
                "group_id": 777,
                "message": [{"type": "text", "data": {"text": "out"}}]
            },
            "echo": "e9"
        });
        let event = message_sent_event(&call, Some(10001), Some(555)).unwrap();
        assert_eq!(event["post_type"], "message_sent");
        assert_eq!(event["self_id"], 10001);
        assert_eq!(event["message_id"], 555);
        assert_eq!(event["raw_message"], "out");
        assert_eq!(event["sender"]["nickname"], "BS Bot Send");
    }

    #[test]
    fn message_sent_event_ignores_non_send_calls() {
        let call = json!({"action": "get_group_list", "params": {}, "echo": "e"});
        assert!(message_sent_event(&call, Some(1), None).is_none());
    }
}
