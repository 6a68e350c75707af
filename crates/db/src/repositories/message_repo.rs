//! Repository for the `messages` table.

use chrono::Utc;

use crate::models::message::{Direction, MessageRecord, NewMessage};
use crate::DbPool;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, connection_id, direction, post_type, message_type, \
                       self_id, user_id, group_id, raw_message, payload, created_at";

/// Provides persistence operations for proxied message traffic.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert a message row, returning the stored record.
    pub async fn insert(pool: &DbPool, input: &NewMessage) -> Result<MessageRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO messages (connection_id, direction, post_type, message_type, \
             self_id, user_id, group_id, raw_message, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MessageRecord>(&query)
            .bind(&input.connection_id)
            .bind(input.direction.as_str())
            .bind(&input.post_type)
            .bind(&input.message_type)
            .bind(input.self_id)
            .bind(input.user_id)
            .bind(input.group_id)
            .bind(&input.raw_message)
            .bind(&input.payload)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Most recent rows, optionally filtered to one connection.
    pub async fn recent(
        pool: &DbPool,
        connection_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MessageRecord>, sqlx::Error> {
        match connection_id {
            Some(id) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM messages
                     WHERE connection_id = ?
                     ORDER BY id DESC LIMIT ?"
                );
                sqlx::query_as::<_, MessageRecord>(&query)
                    .bind(id)
                    .bind(limit)
                    .fetch_all(pool)
                    .await
            }
            None => {
                let query = format!("SELECT {COLUMNS} FROM messages ORDER BY id DESC LIMIT ?");
                sqlx::query_as::<_, MessageRecord>(&query)
                    .bind(limit)
                    .fetch_all(pool)
                    .await
            }
        }
    }

    /// Count rows for a connection in one direction.
    pub async fn count_by_direction(
        pool: &DbPool,
        connection_id: &str,
        direction: Direction,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE connection_id = ? AND direction = ?",
        )
        .bind(connection_id)
        .bind(direction.as_str())
        .fetch_one(pool)
        .await
    }
}
