//! Telegram 429 rate-limit bookkeeping.
//!
//! A flood ban is a future instant until which deliveries for a user must be
//! held. Bans only ever extend; concurrent 429 responses never shorten an
//! existing ban.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::warn;

const DEFAULT_RETRY: Duration = Duration::from_secs(30);
const RETRY_MARGIN: Duration = Duration::from_secs(1);

fn retry_after_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"retry after (\d+)").unwrap())
}

/// Per-user flood ban table.
#[derive(Debug, Default)]
pub struct FloodControl {
    flood_until: Mutex<HashMap<i64, Instant>>,
}

impl FloodControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a send error; 429-shaped errors install or extend a ban.
    /// Anything else is ignored.
    pub fn handle_error(&self, user_id: i64, error_text: &str) {
        if !error_text.contains("Too Many Requests") && !error_text.contains("429") {
            return;
        }

        let wait = retry_after_re()
            .captures(error_text)
            .and_then(|caps| caps[1].parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(|secs| Duration::from_secs(secs) + RETRY_MARGIN)
            .unwrap_or(DEFAULT_RETRY);

        let new_until = Instant::now() + wait;
        let mut map = self.flood_until.lock().expect("flood lock poisoned");
        match map.get_mut(&user_id) {
            // Only extend, never shorten an existing ban.
            Some(until) if *until >= new_until => {}
            Some(until) => {
                *until = new_until;
                warn!("flood control: user {} rate-limited for {:?}", user_id, wait);
            }
            None => {
                map.insert(user_id, new_until);
                warn!("flood control: user {} rate-limited for {:?}", user_id, wait);
            }
        }
    }

    pub fn is_flooded(&self, user_id: i64) -> bool {
        self.remaining(user_id).is_some()
    }

    /// Time left on the user's ban, if any. Expired entries are dropped.
    pub fn remaining(&self, user_id: i64) -> Option<Duration> {
        let mut map = self.flood_until.lock().expect("flood lock poisoned");
        let until = map.get(&user_id).copied()?;
        let now = Instant::now();
        if now >= until {
            map.remove(&user_id);
            return None;
        }
        Some(until - now)
    }

    /// Clear the ban once it has expired. Called by the worker after
    /// sleeping out the ban.
    pub fn clear_expired(&self, user_id: i64) {
        let mut map = self.flood_until.lock().expect("flood lock poisoned");
        if let Some(until) = map.get(&user_id)
            && Instant::now() >= *until
        {
            map.remove(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_flooded_initially() {
        let fc = FloodControl::new();
        assert!(!fc.is_flooded(100));
    }

    #[test]
    fn flooded_after_429() {
        let fc = FloodControl::new();
        fc.handle_error(100, "Too Many Requests: retry after 5");
        assert!(fc.is_flooded(100));

        // retry after 5 + 1s margin
        let remaining = fc.remaining(100).unwrap();
        assert!(remaining <= Duration::from_secs(6));
        assert!(remaining > Duration::from_secs(4));
    }

    #[test]
    fn non_429_ignored() {
        let fc = FloodControl::new();
        fc.handle_error(100, "Bad Request: message is too long");
        assert!(!fc.is_flooded(100));
    }

    #[test]
    fn missing_retry_after_uses_default() {
        let fc = FloodControl::new();
        fc.handle_error(100, "429");
        let remaining = fc.remaining(100).unwrap();
        assert!(remaining <= DEFAULT_RETRY);
        assert!(remaining > Duration::from_secs(25));
    }

    #[test]
    fn bans_only_extend() {
        let fc = FloodControl::new();
        fc.handle_error(100, "Too Many Requests: retry after 60");
        let long = fc.remaining(100).unwrap();

        // A shorter concurrent 429 must not shorten the ban.
        fc.handle_error(100, "Too Many Requests: retry after 2");
        let still = fc.remaining(100).unwrap();
        assert!(still >= long - Duration::from_millis(50));

        // A longer one extends it.
        fc.handle_error(100, "Too Many Requests: retry after 120");
        assert!(fc.remaining(100).unwrap() > long);
    }

    #[test]
    fn per_user_isolation() {
        let fc = FloodControl::new();
        fc.handle_error(100, "Too Many Requests: retry after 30");
        assert!(fc.is_flooded(100));
        assert!(!fc.is_flooded(200));
    }
}
