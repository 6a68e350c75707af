//! Key-based authentication of bot accounts.
//!
//! When enabled, a bot account must prove an operator is present: the
//! `auth` command generates a short-lived key that only shows up in
//! the gateway logs; sending the key back through the bot verifies it.
//! Repeated failures ban the account for a configurable window. State
//! is persisted through [`AuthRepo`] so restarts keep bans and
//! verified accounts.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use bs_core::config::SecurityConfig;
use bs_core::security::{derive_temp_key, random_nonce, TEMP_KEY_TTL_SECS};
use bs_core::types::Timestamp;
use bs_db::models::AuthStatus;
use bs_db::repositories::AuthRepo;
use bs_db::DbPool;

/// Longest aliases first so `auth` does not shadow `authenticate`.
const COMMAND_ALIASES: &[&str] = &["authenticate", "auth", "鉴权"];

/// A parsed in-band auth command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCommand {
    /// `<prefix>auth` — mint a new temporary key.
    Generate,
    /// `<prefix>auth <key>` — verify a key (normalized to uppercase).
    Verify(String),
}

/// Recognize an auth command in a message's flat text.
pub fn parse_auth_command(raw: &str, prefix: &str) -> Option<AuthCommand> {
    let rest = raw.trim().strip_prefix(prefix)?.trim_start();
    for alias in COMMAND_ALIASES {
        let Some(arg) = rest.strip_prefix(alias) else {
            continue;
        };
        if !arg.is_empty() && !arg.starts_with(char::is_whitespace) {
            continue;
        }
        let arg = arg.trim();
        return Some(if arg.is_empty() {
            AuthCommand::Generate
        } else {
            AuthCommand::Verify(arg.to_uppercase())
        });
    }
    None
}

/// A minted, not-yet-used temporary key.
#[derive(Debug, Clone, Serialize)]
pub struct TempKey {
    pub key: String,
    pub bot_id: String,
    pub expires_at: Timestamp,
}

/// Verifies temporary keys and tracks per-bot failure bans.
#[derive(Debug)]
pub struct AuthManager {
    pool: DbPool,
    security: RwLock<SecurityConfig>,
    keys: Mutex<HashMap<String, TempKey>>,
}

impl AuthManager {
    pub fn new(pool: DbPool, security: SecurityConfig) -> Self {
        Self {
            pool,
            security: RwLock::new(security),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Startup pass: lift bans that expired while the gateway was down.
    pub async fn initialize(&self) {
        match AuthRepo::clear_expired_bans(&self.pool).await {
            Ok(0) => {}
            Ok(cleared) => tracing::info!(cleared, "Expired bans lifted"),
            Err(e) => tracing::error!(error = %e, "Failed to clear expired bans"),
        }
        tracing::info!("Auth manager initialized");
    }

    pub async fn enabled(&self) -> bool {
        self.security.read().await.auth_enabled
    }

    /// Swap in new security settings (config reload).
    pub async fn update_security(&self, security: SecurityConfig) {
        *self.security.write().await = security;
    }

    /// Mint a temporary key for a bot account.
    ///
    /// The key value is written to the log on purpose: retrieving it
    /// from there is what proves operator access.
    pub fn generate_temp_key(&self, bot_id: &str) -> TempKey {
        let now = Utc::now();
        let key = derive_temp_key(bot_id, now.timestamp(), &random_nonce());
        let temp = TempKey {
            key: key.clone(),
            bot_id: bot_id.to_string(),
            expires_at: now + Duration::seconds(TEMP_KEY_TTL_SECS),
        };

        let mut keys = self.keys.lock().expect("auth key lock poisoned");
        prune_expired(&mut keys, now);
        keys.insert(key, temp.clone());

        tracing::info!(
            bot_id = %temp.bot_id,
            key = %temp.key,
            expires_at = %temp.expires_at,
            "Generated temporary auth key",
        );
        temp
    }

    /// Verify a key for a bot account. Returns `(success, message)`
    /// where the message is suitable to send back to the chat.
    pub async fn verify_key(&self, bot_id: &str, key: &str) -> (bool, String) {
        let now = Utc::now();

        if let Err(e) = AuthRepo::clear_expired_bans(&self.pool).await {
            tracing::error!(error = %e, "Failed to clear expired bans");
        }
        match AuthRepo::find(&self.pool, bot_id).await {
            Ok(Some(status)) if status.banned_at(now) => {
                return (
                    false,
                    format!(
                        "Too many failed attempts; banned for another {} minute(s)",
                        status.ban_remaining_minutes(now)
                    ),
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to read auth status");
                return (false, "Verification failed, try again later".to_string());
            }
        }

        let normalized = key.trim().to_uppercase();
        let entry = {
            let mut keys = self.keys.lock().expect("auth key lock poisoned");
            prune_expired(&mut keys, now);
            keys.get(&normalized).cloned()
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                return self
                    .record_failure(bot_id, "Key invalid or expired")
                    .await;
            }
        };
        if entry.bot_id != bot_id {
            return self
                .record_failure(bot_id, "Key belongs to a different bot")
                .await;
        }

        if let Err(e) = AuthRepo::mark_authenticated(&self.pool, bot_id).await {
            tracing::error!(error = %e, "Failed to persist authentication");
            return (false, "Verification failed, try again later".to_string());
        }

        // Single use.
        self.keys
            .lock()
            .expect("auth key lock poisoned")
            .remove(&normalized);

        tracing::info!(bot_id, "Bot authenticated");
        (
            true,
            "Verification successful; this bot is now authorized".to_string(),
        )
    }

    async fn record_failure(&self, bot_id: &str, reason: &str) -> (bool, String) {
        let security = self.security.read().await.clone();

        match AuthRepo::record_failed_attempt(&self.pool, bot_id).await {
            Ok(status) => {
                if status.failed_attempts >= i64::from(security.max_attempts) {
                    let until = Utc::now() + Duration::minutes(security.ban_duration_minutes);
                    if let Err(e) = AuthRepo::ban(&self.pool, bot_id, until).await {
                        tracing::error!(error = %e, "Failed to persist ban");
                    }
                    tracing::warn!(
                        bot_id,
                        attempts = status.failed_attempts,
                        "Bot banned after repeated auth failures",
                    );
                    (
                        false,
                        format!(
                            "{reason}; too many failed attempts, banned for {} minute(s)",
                            security.ban_duration_minutes
                        ),
                    )
                } else {
                    let remaining = i64::from(security.max_attempts) - status.failed_attempts;
                    (false, format!("{reason}; {remaining} attempt(s) remaining"))
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record auth failure");
                (false, "Verification failed, try again later".to_string())
            }
        }
    }

    /// Whether a bot may have its message events forwarded.
    /// Always true when key auth is disabled.
    pub async fn is_authenticated(&self, bot_id: &str) -> bool {
        if !self.enabled().await {
            return true;
        }
        match AuthRepo::find(&self.pool, bot_id).await {
            Ok(Some(status)) => status.is_authenticated,
            Ok(None) => false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read auth status");
                false
            }
        }
    }

    /// Execute a parsed auth command, returning the chat reply text.
    pub async fn handle_command(&self, bot_id: &str, command: AuthCommand, prefix: &str) -> String {
        if !self.enabled().await {
            return "Key authentication is disabled; no verification needed.".to_string();
        }
        match command {
            AuthCommand::Generate => {
                self.generate_temp_key(bot_id);
                format!(
                    "Temporary key generated for bot {bot_id}, valid for 3 minutes.\n\
                     Retrieve it from the gateway logs, then verify with: {prefix}auth <key>"
                )
            }
            AuthCommand::Verify(key) => self.verify_key(bot_id, &key).await.1,
        }
    }

    /// Unexpired keys (operator-facing listing).
    pub fn valid_keys(&self) -> Vec<TempKey> {
        let mut keys = self.keys.lock().expect("auth key lock poisoned");
        prune_expired(&mut keys, Utc::now());
        keys.values().cloned().collect()
    }

    /// Auth state for one bot account.
    pub async fn status(&self, bot_id: &str) -> Result<Option<AuthStatus>, sqlx::Error> {
        AuthRepo::find(&self.pool, bot_id).await
    }

    /// Forget a bot account entirely (logout).
    pub async fn logout(&self, bot_id: &str) -> Result<bool, sqlx::Error> {
        let removed = AuthRepo::delete(&self.pool, bot_id).await?;
        if removed {
            tracing::info!(bot_id, "Bot logged out");
        }
        Ok(removed)
    }
}

fn prune_expired(keys: &mut HashMap<String, TempKey>, now: Timestamp) {
    keys.retain(|_, key| key.expires_at > now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_generate_command() {
        assert_eq!(parse_auth_command("bsauth", "bs"), Some(AuthCommand::Generate));
        assert_eq!(parse_auth_command("  bs auth  ", "bs"), Some(AuthCommand::Generate));
        assert_eq!(parse_auth_command("bs鉴权", "bs"), Some(AuthCommand::Generate));
        assert_eq!(
            parse_auth_command("bsauthenticate", "bs"),
            Some(AuthCommand::Generate)
        );
    }

    #[test]
    fn parse_verify_command_uppercases_key() {
        assert_eq!(
            parse_auth_command("bsauth abc123def456abc123de", "bs"),
            Some(AuthCommand::Verify("ABC123DEF456ABC123DE".to_string()))
        );
        assert_eq!(
            parse_auth_command("bs鉴权 FFEE", "bs"),
            Some(AuthCommand::Verify("FFEE".to_string()))
        );
    }

    #[test]
    fn parse_rejects_other_text() {
        assert!(parse_auth_command("hello world", "bs").is_none());
        assert!(parse_auth_command("auth", "bs").is_none());
        // Alias must end at a word boundary.
        assert!(parse_auth_command("bsauthority", "bs").is_none());
    }

    #[test]
    fn parse_respects_custom_prefix() {
        assert_eq!(parse_auth_command("!auth", "!"), Some(AuthCommand::Generate));
        assert!(parse_auth_command("bsauth", "!").is_none());
    }

    #[test]
    fn prune_drops_only_expired_keys() {
        let now = Utc::now();
        let mut keys = HashMap::new();
        keys.insert(
            "OLD".to_string(),
            TempKey {
                key: "OLD".into(),
                bot_id: "1".into(),
                expires_at: now - Duration::seconds(1),
            },
        );
        keys.insert(
            "FRESH".to_string(),
            TempKey {
                key: "FRESH".into(),
                bot_id: "1".into(),
                expires_at: now + Duration::seconds(60),
            },
        );
        prune_expired(&mut keys, now);
        assert!(keys.contains_key("FRESH"));
        assert!(!keys.contains_key("OLD"));
    }
}
