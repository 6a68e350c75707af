//! Key-generation and validation primitives.
//!
//! Temporary auth keys are derived with SHA-256 over
//! `bot_id:timestamp:nonce` and truncated to 20 uppercase hex chars —
//! short enough to type into a chat message, random enough to not be
//! guessable within their 3-minute lifetime.

use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Seconds a temporary auth key stays valid.
pub const TEMP_KEY_TTL_SECS: i64 = 180;

/// Length of the derived temporary key.
pub const TEMP_KEY_LEN: usize = 20;

/// Generate a random alphanumeric API key. Minimum length 16.
pub fn generate_api_key(length: usize) -> Result<String, CoreError> {
    if length < 16 {
        return Err(CoreError::Validation(
            "API key length must be at least 16 characters".to_string(),
        ));
    }
    Ok(rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect())
}

/// Check that a key is plausible: long enough and strictly alphanumeric.
pub fn validate_api_key(key: &str, min_length: usize) -> bool {
    key.len() >= min_length && key.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Random nonce mixed into temporary key derivation.
pub fn random_nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Derive a temporary auth key from its inputs. Deterministic.
pub fn derive_temp_key(bot_id: &str, timestamp: i64, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{bot_id}:{timestamp}:{nonce}").as_bytes());
    let digest = hasher.finalize();

    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..TEMP_KEY_LEN].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_has_requested_length_and_charset() {
        let key = generate_api_key(32).unwrap();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn api_key_rejects_short_lengths() {
        assert!(generate_api_key(8).is_err());
    }

    #[test]
    fn api_keys_are_unique() {
        let a = generate_api_key(32).unwrap();
        let b = generate_api_key(32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn validate_api_key_charset_and_length() {
        assert!(validate_api_key("A1b2C3d4E5f6G7h8", 16));
        assert!(!validate_api_key("short", 16));
        assert!(!validate_api_key("has spaces here!!!!!", 16));
    }

    #[test]
    fn temp_key_is_deterministic_and_formatted() {
        let a = derive_temp_key("10001", 1700000000, "nonce");
        let b = derive_temp_key("10001", 1700000000, "nonce");
        assert_eq!(a, b);
        assert_eq!(a.len(), TEMP_KEY_LEN);
        assert!(a.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn temp_key_varies_with_inputs() {
        let base = derive_temp_key("10001", 1700000000, "nonce");
        assert_ne!(base, derive_temp_key("10002", 1700000000, "nonce"));
        assert_ne!(base, derive_temp_key("10001", 1700000001, "nonce"));
        assert_ne!(base, derive_temp_key("10001", 1700000000, "other"));
    }
}
