//! OneBot v11 message segments and raw-message rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element of an array-format OneBot message.
///
/// `data` stays dynamic: its keys differ per segment kind (`text` has
/// `text`, `at` has `qq`, `image` has `file`/`url`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSegment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl MessageSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            data: serde_json::json!({ "text": text.into() }),
        }
    }

    /// String field from `data`, empty if absent or not a string.
    pub fn data_str(&self, key: &str) -> &str {
        self.data.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

/// Render an array-format message into the flat `raw_message` text the
/// protocol carries alongside it.
///
/// Placeholders match what OneBot implementations themselves produce,
/// so persisted rows and converted frames stay searchable.
pub fn render_raw_message(segments: &[Value]) -> String {
    let mut parts = Vec::with_capacity(segments.len());
    for value in segments {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
        let data = value.get("data");
        let field = |key: &str| -> String {
            data.and_then(|d| d.get(key))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        match kind {
            "text" => parts.push(field("text")),
            "at" => parts.push(format!("@{}", field("qq"))),
            "image" => parts.push("[图片]".to_string()),
            "record" => parts.push("[语音]".to_string()),
            "reply" => parts.push("[回复]".to_string()),
            "file" => parts.push("[文件]".to_string()),
            "face" => parts.push("[表情]".to_string()),
            "forward" | "node" => parts.push("[合并转发]".to_string()),
            "" => {}
            other => parts.push(format!("[{other}]")),
        }
    }
    parts.concat()
}
