//! Repository for the `auth_status` table.

use bs_core::types::Timestamp;
use chrono::Utc;

use crate::models::auth::AuthStatus;
use crate::DbPool;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, bot_id, is_authenticated, authenticated_at, failed_attempts, \
                       last_attempt_at, is_banned, banned_until, created_at, updated_at";

/// Provides persistence operations for bot authentication state.
pub struct AuthRepo;

impl AuthRepo {
    /// Look up the row for a bot account.
    pub async fn find(pool: &DbPool, bot_id: &str) -> Result<Option<AuthStatus>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM auth_status WHERE bot_id = ?");
        sqlx::query_as::<_, AuthStatus>(&query)
            .bind(bot_id)
            .fetch_optional(pool)
            .await
    }

    /// Mark a bot authenticated, clearing failures and any ban.
    pub async fn mark_authenticated(
        pool: &DbPool,
        bot_id: &str,
    ) -> Result<AuthStatus, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO auth_status (bot_id, is_authenticated, authenticated_at, created_at, updated_at)
             VALUES (?, 1, ?, ?, ?)
             ON CONFLICT (bot_id) DO UPDATE SET
                 is_authenticated = 1,
                 authenticated_at = excluded.authenticated_at,
                 failed_attempts = 0,
                 is_banned = 0,
                 banned_until = NULL,
                 updated_at = excluded.updated_at
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AuthStatus>(&query)
            .bind(bot_id)
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Record one failed verification attempt, returning the updated row.
    pub async fn record_failed_attempt(
        pool: &DbPool,
        bot_id: &str,
    ) -> Result<AuthStatus, sqlx::Error> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO auth_status (bot_id, failed_attempts, last_attempt_at, created_at, updated_at)
             VALUES (?, 1, ?, ?, ?)
             ON CONFLICT (bot_id) DO UPDATE SET
                 failed_attempts = failed_attempts + 1,
                 last_attempt_at = excluded.last_attempt_at,
                 updated_at = excluded.updated_at
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AuthStatus>(&query)
            .bind(bot_id)
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Ban a bot until the given instant. Returns `true` if a row changed.
    pub async fn ban(
        pool: &DbPool,
        bot_id: &str,
        until: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE auth_status SET is_banned = 1, banned_until = ?, updated_at = ?
             WHERE bot_id = ?",
        )
        .bind(until)
        .bind(Utc::now())
        .bind(bot_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Lift expired bans and reset their failure counters.
    /// Returns the count of rows cleared.
    pub async fn clear_expired_bans(pool: &DbPool) -> Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE auth_status SET is_banned = 0, banned_until = NULL, failed_attempts = 0, updated_at = ?
             WHERE is_banned = 1 AND banned_until IS NOT NULL AND banned_until < ?",
        )
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Drop a bot's row entirely (logout). Returns `true` if it existed.
    pub async fn delete(pool: &DbPool, bot_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM auth_status WHERE bot_id = ?")
            .bind(bot_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
