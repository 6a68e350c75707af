//! Per-bot authentication state.

use bs_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `auth_status` table. One row per bot account.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuthStatus {
    pub id: DbId,
    pub bot_id: String,
    pub is_authenticated: bool,
    pub authenticated_at: Option<Timestamp>,
    pub failed_attempts: i64,
    pub last_attempt_at: Option<Timestamp>,
    pub is_banned: bool,
    pub banned_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AuthStatus {
    /// Whether a ban is in force at `now`.
    pub fn banned_at(&self, now: Timestamp) -> bool {
        self.is_banned && self.banned_until.map(|until| until > now).unwrap_or(true)
    }

    /// Whole minutes of ban remaining at `now` (0 when not banned).
    pub fn ban_remaining_minutes(&self, now: Timestamp) -> i64 {
        match self.banned_until {
            Some(until) if self.is_banned && until > now => {
                ((until - now).num_seconds() + 59) / 60
            }
            _ => 0,
        }
    }
}
