//! Echo correlation between API calls and their responses.
//!
//! Every API call a target sends carries an `echo` token; the bot
//! client's response echoes it back. The tracker remembers which
//! target issued which echo so the response can be routed exclusively
//! to that target, and keeps the original call around for failure
//! logging and `message_sent` materialization.
//!
//! Entries are keyed by `(target_index, echo)` so two targets reusing
//! the same token do not clobber each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Entries past this age are eligible for pruning.
const MAX_ENTRY_AGE: Duration = Duration::from_secs(120);

/// Prune is triggered once the cache grows to this size. A healthy
/// link answers calls within seconds, so reaching it means responses
/// are going missing.
const PRUNE_THRESHOLD: usize = 100;

/// A registered API call awaiting its response.
#[derive(Debug, Clone)]
pub struct EchoEntry {
    pub target_index: usize,
    /// The original API call frame.
    pub payload: Value,
    created: Instant,
}

/// Thread-safe echo registry for one proxy connection.
#[derive(Debug)]
pub struct EchoTracker {
    entries: Mutex<HashMap<(usize, String), EchoEntry>>,
}

impl EchoTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Remember an outstanding call from `target_index`.
    pub fn register(&self, target_index: usize, echo: String, payload: Value) {
        let mut entries = self.entries.lock().expect("echo tracker lock poisoned");

        let key = (target_index, echo);
        if entries.contains_key(&key) {
            tracing::warn!(
                target_index,
                echo = %key.1,
                "Echo already registered, overwriting",
            );
        }
        entries.insert(
            key,
            EchoEntry {
                target_index,
                payload,
                created: Instant::now(),
            },
        );

        if entries.len() >= PRUNE_THRESHOLD {
            let before = entries.len();
            entries.retain(|_, entry| entry.created.elapsed() <= MAX_ENTRY_AGE);
            tracing::warn!(
                before,
                after = entries.len(),
                "Echo cache hit prune threshold, expired entries dropped",
            );
        }
    }

    /// Claim the entry for a response's echo, removing it.
    ///
    /// When several targets registered the same token, the lowest
    /// target index wins.
    pub fn take(&self, echo: &str) -> Option<EchoEntry> {
        let mut entries = self.entries.lock().expect("echo tracker lock poisoned");
        let key = entries
            .keys()
            .filter(|(_, e)| e == echo)
            .min_by_key(|(index, _)| *index)
            .cloned()?;
        entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("echo tracker lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EchoTracker {
    fn default() -> Self {
        Self::new()
    }
}
