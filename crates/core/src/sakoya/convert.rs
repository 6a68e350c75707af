//! Bidirectional conversion between OneBot v11 and Sakoya frames.
//!
//! Four mappings:
//! - OneBot message event  -> Sakoya `MessageReceive` (toward backend)
//! - OneBot send-API call  -> Sakoya `MessageSend`    (toward backend)
//! - Sakoya `MessageSend`  -> OneBot send-API call    (toward client)
//! - Sakoya `MessageReceive` -> OneBot message event  (toward client)
//!
//! All id fields cross the boundary as strings on the Sakoya side and
//! integers on the OneBot side; non-numeric ids degrade to 0 rather
//! than failing the frame.

use serde_json::{json, Value};

use crate::onebot::event::EventView;
use crate::sakoya::{MessageReceive, MessageSend, SakoyaSegment};

fn parse_id(value: Option<&str>) -> i64 {
    value.and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn value_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Convert a OneBot message event into a Sakoya `MessageReceive`.
///
/// Returns `None` for anything that is not a message event. Images in
/// a `reply` field (implementations like NapCat attach the quoted
/// message there) are appended so the backend sees the full context.
pub fn event_to_message_receive(event: &Value, bot_id: &str) -> Option<MessageReceive> {
    let view = EventView(event);
    if !view.is_message() {
        return None;
    }

    let is_group = view.message_type() == Some("group");
    let mut content = Vec::new();

    for segment in view.segments().map(Vec::as_slice).unwrap_or(&[]) {
        let kind = value_field(segment, "type");
        let data = segment.get("data").cloned().unwrap_or(Value::Null);
        match kind {
            "text" => content.push(SakoyaSegment::new("text", Value::from(value_field(&data, "text")))),
            "at" => {
                // qq may arrive as a number; Sakoya wants a string.
                let qq = match data.get("qq") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                content.push(SakoyaSegment::new("at", Value::from(qq)));
            }
            "image" => {
                // Prefer the resolved url over the file reference.
                let url = value_field(&data, "url");
                let file = value_field(&data, "file");
                let source = if url.is_empty() { file } else { url };
                content.push(SakoyaSegment::new("image", Value::from(source)));
            }
            "record" => content.push(SakoyaSegment::new("record", Value::from(value_field(&data, "file")))),
            "reply" => content.push(SakoyaSegment::new("reply", Value::from(value_field(&data, "id")))),
            _ => content.push(SakoyaSegment::new("text", Value::from(data.to_string()))),
        }
    }

    // Quoted-message completion: surface images from the quoted message
    // so picture-context features work across the protocol boundary.
    if let Some(reply_segments) = event
        .get("reply")
        .and_then(|r| r.get("message"))
        .and_then(Value::as_array)
    {
        for segment in reply_segments {
            if value_field(segment, "type") != "image" {
                continue;
            }
            let data = segment.get("data").cloned().unwrap_or(Value::Null);
            let file = value_field(&data, "file");
            let payload = if let Some(b64) = file.strip_prefix("base64://") {
                json!({ "type": "b64", "content": b64 })
            } else if file.starts_with("http") {
                json!({ "type": "url", "content": file })
            } else {
                json!({ "type": "file", "content": file })
            };
            content.push(SakoyaSegment::new("image", payload));
        }
    }

    let sender = event.get("sender").cloned().unwrap_or(Value::Null);
    let sakoya_sender = json!({
        "nickname": value_field(&sender, "nickname"),
        "card": value_field(&sender, "card"),
    });

    let string_id = |key: &str| -> String {
        match event.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    Some(MessageReceive {
        bot_id: bot_id.to_string(),
        bot_self_id: string_id("self_id"),
        msg_id: string_id("message_id"),
        user_type: if is_group { "group" } else { "direct" }.to_string(),
        group_id: is_group.then(|| string_id("group_id")),
        user_id: Some(string_id("user_id")),
        sender: sakoya_sender,
        user_pm: 3,
        content,
    })
}

/// Convert a Sakoya `MessageReceive` into a OneBot message event.
pub fn message_receive_to_event(message: &MessageReceive) -> Value {
    let is_group = message.user_type == "group";

    let mut segments = Vec::new();
    let mut raw_parts: Vec<String> = Vec::new();

    for segment in &message.content {
        match segment.kind() {
            "text" => {
                let text = segment.data_string();
                segments.push(json!({ "type": "text", "data": { "text": text } }));
                raw_parts.push(text);
            }
            "at" => {
                let qq = segment.data_string();
                segments.push(json!({ "type": "at", "data": { "qq": qq } }));
                raw_parts.push(format!("@{qq}"));
            }
            "image" => {
                if let Some(data) = segment.data.as_ref().and_then(Value::as_object) {
                    let img_type = data.get("type").and_then(Value::as_str).unwrap_or("url");
                    let content = data.get("content").and_then(Value::as_str).unwrap_or("");
                    let file = match img_type {
                        "b64" if content.starts_with("base64://") => content.to_string(),
                        "b64" => format!("base64://{content}"),
                        _ => content.to_string(),
                    };
                    segments.push(json!({ "type": "image", "data": { "file": file } }));
                }
                raw_parts.push("[图片]".to_string());
            }
            "reply" => {
                let id = segment.data_string();
                segments.push(json!({ "type": "reply", "data": { "id": id } }));
                raw_parts.push("[回复]".to_string());
            }
            "record" => {
                if let Some(Value::String(file)) = &segment.data {
                    segments.push(json!({ "type": "record", "data": { "file": file } }));
                }
                raw_parts.push("[语音]".to_string());
            }
            "file" => {
                // Sakoya file payload: "{name}|{base64}".
                if let Some(Value::String(payload)) = &segment.data {
                    if let Some((name, b64)) = payload.split_once('|') {
                        segments.push(json!({
                            "type": "file",
                            "data": { "file": format!("base64://{b64}"), "name": name }
                        }));
                    }
                }
                raw_parts.push("[文件]".to_string());
            }
            "node" => {
                // Forward nodes flatten to their text content.
                if let Some(Value::Array(nodes)) = &segment.data {
                    for node in nodes {
                        if let Some(inner) = node.as_array() {
                            for seg in inner {
                                if value_field(seg, "type") == "text" {
                                    if let Some(text) = seg.get("data").and_then(Value::as_str) {
                                        raw_parts.push(text.to_string());
                                    }
                                }
                            }
                        }
                    }
                }
            }
            "markdown" => {
                let text = segment.data_string();
                segments.push(json!({ "type": "text", "data": { "text": text } }));
                raw_parts.push(text);
            }
            "buttons" => raw_parts.push("[按钮消息]".to_string()),
            _ => {
                let text = segment.data_string();
                if !text.is_empty() {
                    raw_parts.push(text);
                }
            }
        }
    }

    let raw_message = raw_parts.concat();
    let sender = &message.sender;
    let onebot_sender = json!({
        "user_id": parse_id(message.user_id.as_deref()),
        "nickname": value_field(sender, "nickname"),
        "card": value_field(sender, "card"),
        "sex": "unknown",
        "age": 0,
        "area": "",
        "level": "",
        "role": "member",
        "title": "",
    });

    let mut event = json!({
        "post_type": "message",
        "message_type": if is_group { "group" } else { "private" },
        "sub_type": if is_group { "normal" } else { "friend" },
        "message_id": parse_id(Some(message.msg_id.as_str())),
        "user_id": parse_id(message.user_id.as_deref()),
        "raw_message": raw_message,
        "message": segments,
        "font": 0,
        "sender": onebot_sender,
        "time": 0,
        "self_id": parse_id(Some(message.bot_self_id.as_str())),
    });
    if is_group {
        event["group_id"] = Value::from(parse_id(message.group_id.as_deref()));
    }
    event
}

/// Convert a Sakoya `MessageSend` into a OneBot send-API call.
///
/// Empty content is replaced by a single empty text segment; some
/// client implementations reject a zero-length message array.
pub fn message_send_to_api_call(message: &MessageSend) -> Value {
    let is_group = message.target_type.as_deref() == Some("group");

    let mut segments = Vec::new();
    for segment in message.content.as_deref().unwrap_or(&[]) {
        let kind = segment.kind();
        if kind.starts_with("log_") {
            // Backend log lines ride the same channel; not user traffic.
            continue;
        }
        match kind {
            "text" => segments.push(json!({ "type": "text", "data": { "text": segment.data_string() } })),
            "at" => segments.push(json!({ "type": "at", "data": { "qq": segment.data_string() } })),
            "image" => {
                if let Some(data) = segment.data.as_ref().and_then(Value::as_object) {
                    let img_type = data.get("type").and_then(Value::as_str).unwrap_or("url");
                    let content = data.get("content").and_then(Value::as_str).unwrap_or("");
                    let file = match img_type {
                        "b64" if content.starts_with("base64://") => content.to_string(),
                        "b64" => format!("base64://{content}"),
                        _ => content.to_string(),
                    };
                    segments.push(json!({ "type": "image", "data": { "file": file } }));
                } else {
                    let file = segment.data_string();
                    if !file.is_empty() {
                        segments.push(json!({ "type": "image", "data": { "file": file } }));
                    }
                }
            }
            "reply" => segments.push(json!({ "type": "reply", "data": { "id": segment.data_string() } })),
            "record" => segments.push(json!({ "type": "record", "data": { "file": segment.data_string() } })),
            "file" => {
                if let Some(Value::String(payload)) = &segment.data {
                    if let Some((name, b64)) = payload.split_once('|') {
                        segments.push(json!({
                            "type": "file",
                            "data": { "file": format!("base64://{b64}"), "name": name }
                        }));
                    }
                }
            }
            "markdown" => segments.push(json!({ "type": "text", "data": { "text": segment.data_string() } })),
            _ => {
                let text = segment.data_string();
                if !text.is_empty() {
                    segments.push(json!({ "type": "text", "data": { "text": text } }));
                }
            }
        }
    }

    if segments.is_empty() {
        segments.push(json!({ "type": "text", "data": { "text": "" } }));
    }

    let echo = uuid::Uuid::new_v4().simple().to_string();
    if is_group {
        json!({
            "action": "send_group_msg",
            "params": {
                "group_id": parse_id(message.target_id.as_deref()),
                "message": segments,
            },
            "echo": echo,
        })
    } else {
        json!({
            "action": "send_private_msg",
            "params": {
                "user_id": parse_id(message.target_id.as_deref()),
                "message": segments,
            },
            "echo": echo,
        })
    }
}

/// Convert a OneBot send-API call into a Sakoya `MessageSend`.
pub fn send_call_to_message_send(call: &Value) -> MessageSend {
    let params = call.get("params").cloned().unwrap_or(Value::Null);
    let message_type = value_field(&params, "message_type");

    let group_id = params.get("group_id");
    let (target_type, target_id) = if message_type == "group" || group_id.is_some() {
        (
            "group",
            group_id.map(id_to_string).unwrap_or_default(),
        )
    } else {
        (
            "direct",
            params.get("user_id").map(id_to_string).unwrap_or_default(),
        )
    };

    let mut content = Vec::new();
    for segment in params
        .get("message")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
    {
        let kind = value_field(segment, "type");
        let data = segment.get("data").cloned().unwrap_or(Value::Null);
        match kind {
            "text" => content.push(SakoyaSegment::new("text", Value::from(value_field(&data, "text")))),
            "at" => content.push(SakoyaSegment::new("at", Value::from(value_field(&data, "qq")))),
            "image" => {
                let file = value_field(&data, "file");
                let payload = if let Some(b64) = file.strip_prefix("base64://") {
                    json!({ "type": "b64", "content": b64 })
                } else if file.starts_with("http") {
                    json!({ "type": "url", "content": file })
                } else {
                    json!({ "type": "file", "content": file })
                };
                content.push(SakoyaSegment::new("image", payload));
            }
            "record" => content.push(SakoyaSegment::new("record", Value::from(value_field(&data, "file")))),
            "file" => {
                let file = value_field(&data, "file");
                let name = data.get("name").and_then(Value::as_str).unwrap_or("unknown");
                if let Some(b64) = file.strip_prefix("base64://") {
                    content.push(SakoyaSegment::new("file", Value::from(format!("{name}|{b64}"))));
                } else {
                    content.push(SakoyaSegment::new("text", Value::from(format!("[文件: {name}]"))));
                }
            }
            "reply" => content.push(SakoyaSegment::new("reply", Value::from(value_field(&data, "id")))),
            "forward" | "node" => {
                content.push(SakoyaSegment::new("text", Value::from("[合并转发消息暂不支持]")));
            }
            _ => content.push(SakoyaSegment::new("text", Value::from(data.to_string()))),
        }
    }

    MessageSend {
        bot_id: "Bot".to_string(),
        bot_self_id: call
            .get("self_id")
            .map(id_to_string)
            .unwrap_or_default(),
        msg_id: String::new(),
        target_type: Some(target_type.to_string()),
        target_id: Some(target_id),
        content: Some(content),
    }
}

fn id_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_event() -> Value {
        json!({
            "post_type": "message",
            "message_type": "group",
            "message_id": 42,
            "group_id": 100,
            "user_id": 200,
            "self_id": 300,
            "sender": {"nickname": "alice", "card": "A"},
            "message": [
                {"type": "text", "data": {"text": "hello "}},
                {"type": "at", "data": {"qq": 300}},
                {"type": "image", "data": {"file": "x.png", "url": "http://img/x.png"}}
            ]
        })
    }

    #[test]
    fn event_to_message_receive_group() {
        let mr = event_to_message_receive(&group_event(), "NoneBot2").unwrap();
        assert_eq!(mr.bot_id, "NoneBot2");
        assert_eq!(mr.bot_self_id, "300");
        assert_eq!(mr.msg_id, "42");
        assert_eq!(mr.user_type, "group");
        assert_eq!(mr.group_id.as_deref(), Some("100"));
        assert_eq!(mr.user_id.as_deref(), Some("200"));
        assert_eq!(mr.sender["nickname"], "alice");

        assert_eq!(mr.content.len(), 3);
        assert_eq!(mr.content[0].kind(), "text");
        assert_eq!(mr.content[0].data_string(), "hello ");
        assert_eq!(mr.content[1].kind(), "at");
        assert_eq!(mr.content[1].data_string(), "300");
        // url wins over file.
        assert_eq!(mr.content[2].data_string(), "http://img/x.png");
    }

    #[test]
    fn event_to_message_receive_private() {
        let event = json!({
            "post_type": "message",
            "message_type": "private",
            "message_id": 1,
            "user_id": 5,
            "self_id": 6,
            "message": [{"type": "text", "data": {"text": "hi"}}]
        });
        let mr = event_to_message_receive(&event, "Bot").unwrap();
        assert_eq!(mr.user_type, "direct");
        assert!(mr.group_id.is_none());
    }

    #[test]
    fn event_to_message_receive_rejects_non_message() {
        let event = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        assert!(event_to_message_receive(&event, "Bot").is_none());
    }

    #[test]
    fn event_to_message_receive_appends_quoted_images() {
        let mut event = group_event();
        event["reply"] = json!({
            "message": [
                {"type": "text", "data": {"text": "quoted"}},
                {"type": "image", "data": {"file": "base64://AAA"}},
                {"type": "image", "data": {"file": "http://img/q.png"}}
            ]
        });
        let mr = event_to_message_receive(&event, "Bot").unwrap();
        let tail: Vec<_> = mr.content.iter().rev().take(2).collect();
        // Last two segments carry the quoted images in {type, content} form.
        assert_eq!(tail[0].data.as_ref().unwrap()["type"], "url");
        assert_eq!(tail[0].data.as_ref().unwrap()["content"], "http://img/q.png");
        assert_eq!(tail[1].data.as_ref().unwrap()["type"], "b64");
        assert_eq!(tail[1].data.as_ref().unwrap()["content"], "AAA");
    }

    #[test]
    fn message_receive_to_event_group() {
        let mr: MessageReceive = serde_json::from_value(json!({
            "bot_id": "Bot",
            "bot_self_id": "300",
            "msg_id": "42",
            "user_type": "group",
            "group_id": "100",
            "user_id": "200",
            "sender": {"nickname": "alice"},
            "content": [
                {"type": "text", "data": "hey"},
                {"type": "at", "data": "300"},
                {"type": "image", "data": {"type": "b64", "content": "QUJD"}}
            ]
        }))
        .unwrap();

        let event = message_receive_to_event(&mr);
        assert_eq!(event["post_type"], "message");
        assert_eq!(event["message_type"], "group");
        assert_eq!(event["group_id"], 100);
        assert_eq!(event["user_id"], 200);
        assert_eq!(event["self_id"], 300);
        assert_eq!(event["raw_message"], "hey@300[图片]");
        assert_eq!(event["message"][2]["data"]["file"], "base64://QUJD");
        assert_eq!(event["sender"]["nickname"], "alice");
    }

    #[test]
    fn message_receive_to_event_non_numeric_ids_degrade_to_zero() {
        let mr: MessageReceive = serde_json::from_value(json!({
            "user_type": "direct",
            "user_id": "not-a-number",
            "msg_id": "xyz",
            "content": []
        }))
        .unwrap();
        let event = message_receive_to_event(&mr);
        assert_eq!(event["message_type"], "private");
        assert_eq!(event["user_id"], 0);
        assert_eq!(event["message_id"], 0);
    }

    #[test]
    fn message_send_to_api_call_group() {
        let ms: MessageSend = serde_json::from_value(json!({
            "bot_id": "Bot",
            "target_type": "group",
            "target_id": "100",
            "content": [
                {"type": "text", "data": "result"},
                {"type": "image", "data": {"type": "b64", "content": "QUJD"}},
                {"type": "log_info", "data": "backend log line"}
            ]
        }))
        .unwrap();

        let call = message_send_to_api_call(&ms);
        assert_eq!(call["action"], "send_group_msg");
        assert_eq!(call["params"]["group_id"], 100);
        let segments = call["params"]["message"].as_array().unwrap();
        // log_* segments are dropped.
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1]["data"]["file"], "base64://QUJD");
        assert!(!call["echo"].as_str().unwrap().is_empty());
    }

    #[test]
    fn message_send_to_api_call_private_with_empty_content() {
        let ms: MessageSend = serde_json::from_value(json!({
            "target_type": "direct",
            "target_id": "55",
            "content": []
        }))
        .unwrap();
        let call = message_send_to_api_call(&ms);
        assert_eq!(call["action"], "send_private_msg");
        assert_eq!(call["params"]["user_id"], 55);
        // Empty content becomes a single empty text segment.
        assert_eq!(call["params"]["message"][0]["data"]["text"], "");
    }

    #[test]
    fn send_call_to_message_send_group() {
        let call = json!({
            "action": "send_msg",
            "self_id": 300,
            "params": {
                "message_type": "group",
                "group_id": 100,
                "message": [
                    {"type": "text", "data": {"text": "out"}},
                    {"type": "image", "data": {"file": "base64://Zm9v"}},
                    {"type": "image", "data": {"file": "http://img/y.png"}},
                    {"type": "node", "data": {}}
                ]
            },
            "echo": "e"
        });
        let ms = send_call_to_message_send(&call);
        assert_eq!(ms.target_type.as_deref(), Some("group"));
        assert_eq!(ms.target_id.as_deref(), Some("100"));
        assert_eq!(ms.bot_self_id, "300");
        let content = ms.content.unwrap();
        assert_eq!(content[1].data.as_ref().unwrap()["type"], "b64");
        assert_eq!(content[1].data.as_ref().unwrap()["content"], "Zm9v");
        assert_eq!(content[2].data.as_ref().unwrap()["type"], "url");
        assert_eq!(content[3].data_string(), "[合并转发消息暂不支持]");
    }

    #[test]
    fn send_call_to_message_send_private() {
        let call = json!({
            "action": "send_private_msg",
            "params": {
                "user_id": 55,
                "message": [{"type": "text", "data": {"text": "hi"}}]
            }
        });
        let ms = send_call_to_message_send(&call);
        assert_eq!(ms.target_type.as_deref(), Some("direct"));
        assert_eq!(ms.target_id.as_deref(), Some("55"));
    }
}
