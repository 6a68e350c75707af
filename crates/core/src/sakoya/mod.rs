//! Sakoya (gscore) protocol models.
//!
//! Some downstream backends speak the Sakoya WebSocket protocol instead
//! of OneBot v11: inbound user messages are `MessageReceive` frames,
//! outbound bot messages are `MessageSend` frames, both JSON. The
//! converter in [`convert`] maps between the two protocols.

pub mod convert;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One Sakoya message segment. `data` is a string for simple kinds
/// (text, at) and an object (`{type, content}`) for media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SakoyaSegment {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl SakoyaSegment {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            kind: Some(kind.to_string()),
            data: Some(data),
        }
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("")
    }

    /// `data` rendered as a plain string (empty when absent).
    pub fn data_string(&self) -> String {
        match &self.data {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// A user message pushed toward a Sakoya backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceive {
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    #[serde(default)]
    pub bot_self_id: String,
    #[serde(default)]
    pub msg_id: String,
    #[serde(default = "default_user_type")]
    pub user_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sender: Value,
    #[serde(default = "default_user_pm")]
    pub user_pm: i64,
    #[serde(default)]
    pub content: Vec<SakoyaSegment>,
}

/// A bot message coming back from a Sakoya backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSend {
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    #[serde(default)]
    pub bot_self_id: String,
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub content: Option<Vec<SakoyaSegment>>,
}

fn default_bot_id() -> String {
    "Bot".to_string()
}

fn default_user_type() -> String {
    "group".to_string()
}

fn default_user_pm() -> i64 {
    3
}

/// Sakoya endpoints expose paths shaped `/ws/{bot_id}`.
pub fn is_sakoya_path(path: &str) -> bool {
    extract_bot_id(path).is_some()
}

/// Pull the `bot_id` out of a `/ws/{bot_id}` path.
pub fn extract_bot_id(path: &str) -> Option<&str> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut parts = path.split('/');
    if parts.next() != Some("ws") {
        return None;
    }
    match parts.next() {
        Some(bot_id) if !bot_id.is_empty() => Some(bot_id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bot_id_from_ws_path() {
        assert_eq!(extract_bot_id("/ws/NoneBot2"), Some("NoneBot2"));
        assert_eq!(extract_bot_id("ws/Bot"), Some("Bot"));
        assert_eq!(extract_bot_id("/ws/Bot/extra"), Some("Bot"));
    }

    #[test]
    fn non_sakoya_paths_yield_none() {
        assert_eq!(extract_bot_id("/onebot/v11"), None);
        assert_eq!(extract_bot_id("/ws/"), None);
        assert_eq!(extract_bot_id("/ws"), None);
        assert_eq!(extract_bot_id(""), None);
    }

    #[test]
    fn message_receive_defaults() {
        let mr: MessageReceive = serde_json::from_str("{}").unwrap();
        assert_eq!(mr.bot_id, "Bot");
        assert_eq!(mr.user_type, "group");
        assert_eq!(mr.user_pm, 3);
        assert!(mr.content.is_empty());
    }

    #[test]
    fn message_receive_omits_group_id_when_absent() {
        let mr = MessageReceive {
            bot_id: "Bot".into(),
            bot_self_id: "1".into(),
            msg_id: "2".into(),
            user_type: "direct".into(),
            group_id: None,
            user_id: Some("3".into()),
            sender: Value::Object(Default::default()),
            user_pm: 3,
            content: vec![],
        };
        let json = serde_json::to_value(&mr).unwrap();
        assert!(json.get("group_id").is_none());
    }
}
