//! Exponential-backoff reconnection for dropped target links.
//!
//! When a target connection drops, the owning task calls
//! [`reconnect_loop`] to keep retrying with increasing delays until
//! either the connection is restored or the [`CancellationToken`] is
//! triggered (client gone, reload, shutdown).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{TargetClient, WsStream};

/// Tunable parameters for the exponential-backoff strategy.
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt to reconnect to a target with exponential backoff.
///
/// Returns `Some(stream)` once a connection succeeds, or `None` if the
/// `cancel` token is triggered before a successful connection.
pub async fn reconnect_loop(
    client: &TargetClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<WsStream> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        // Wait before the attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        tracing::debug!(
            connection_id = %client.connection_id(),
            target_index = client.target_index(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to target",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(
                    connection_id = %client.connection_id(),
                    target_index = client.target_index(),
                    "Reconnect cancelled",
                );
                return None;
            }
            result = client.connect() => {
                match result {
                    Ok(stream) => {
                        tracing::info!(
                            connection_id = %client.connection_id(),
                            target_index = client.target_index(),
                            attempt,
                            "Reconnected to target",
                        );
                        return Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %client.connection_id(),
                            target_index = client.target_index(),
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use bs_core::config::TargetEndpoint;

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(3), &config);
        assert_eq!(d, Duration::from_secs(6));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn next_delay_already_at_max() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(600), &config);
        assert_eq!(d, Duration::from_secs(600));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [3, 6, 12, 24, 48, 96, 192, 384, 600, 600];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test]
    async fn cancellation_token_stops_reconnect() {
        let cancel = CancellationToken::new();
        // Cancel up front — the loop must return None without connecting.
        cancel.cancel();

        let client = TargetClient::new(
            "conn-a".into(),
            1,
            TargetEndpoint::Url("ws://localhost:9999".into()),
            HashMap::new(),
        );
        let config = ReconnectConfig::default();

        let result = reconnect_loop(&client, &config, &cancel).await;
        assert!(result.is_none());
    }
}
