//! Persisted message traffic.

use bs_core::onebot::EventView;
use bs_core::types::{ConnectionId, DbId, Timestamp};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

/// Traffic direction relative to the gateway: `RECV` is client-origin
/// traffic, `SEND` is traffic the bot account emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Recv,
    Send,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Recv => "RECV",
            Direction::Send => "SEND",
        }
    }
}

/// A row from the `messages` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageRecord {
    pub id: DbId,
    pub connection_id: String,
    pub direction: String,
    pub post_type: Option<String>,
    pub message_type: Option<String>,
    pub self_id: Option<i64>,
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    pub raw_message: Option<String>,
    /// Full frame JSON, serialized.
    pub payload: String,
    pub created_at: Timestamp,
}

/// Insert payload for a message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub connection_id: ConnectionId,
    pub direction: Direction,
    pub post_type: Option<String>,
    pub message_type: Option<String>,
    pub self_id: Option<i64>,
    pub user_id: Option<i64>,
    pub group_id: Option<i64>,
    pub raw_message: Option<String>,
    pub payload: String,
}

impl NewMessage {
    /// Flatten an event frame into an insertable row.
    pub fn from_event(connection_id: &str, direction: Direction, event: &Value) -> Self {
        let view = EventView(event);
        Self {
            connection_id: connection_id.to_string(),
            direction,
            post_type: view.post_type().map(str::to_string),
            message_type: view.message_type().map(str::to_string),
            self_id: view.self_id(),
            user_id: view.user_id(),
            group_id: view.group_id(),
            raw_message: Some(view.raw_message()),
            payload: event.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_event_extracts_columns() {
        let event = json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 1,
            "user_id": 2,
            "group_id": 3,
            "raw_message": "hello",
            "message": [{"type": "text", "data": {"text": "hello"}}]
        });
        let row = NewMessage::from_event("conn-a", Direction::Recv, &event);
        assert_eq!(row.connection_id, "conn-a");
        assert_eq!(row.direction, Direction::Recv);
        assert_eq!(row.post_type.as_deref(), Some("message"));
        assert_eq!(row.message_type.as_deref(), Some("group"));
        assert_eq!(row.self_id, Some(1));
        assert_eq!(row.group_id, Some(3));
        assert_eq!(row.raw_message.as_deref(), Some("hello"));
        assert!(row.payload.contains("\"post_type\""));
    }
}
