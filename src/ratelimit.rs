//! In-process rate limiting.
//!
//! Generalizes the per-peer event-window counter pattern used elsewhere in
//! this codebase (a `Mutex`-guarded map from peer key to a window/count
//! pair, reset once the window elapses) from a single hardcoded
//! events-per-second limit to a table of named endpoint classes, each with
//! its own window and ceiling, overridable via `RATE_LIMITS_JSON`.

use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
}

#[derive(Debug)]
pub struct RateLimited {
    pub retry_after_seconds: u64,
}

struct WindowCounter {
    window_start: Instant,
    count: u32,
}

pub struct InProcessRateLimiter {
    limits: HashMap<String, LimitConfig>,
    counters: Mutex<HashMap<(String, String), WindowCounter>>,
}

/// Every signed write class gets exactly 1 request per 60s window — the
/// rate limiter table in spec.md §4.9 is part of the contract, not a
/// starting point to be tuned. `register` (unsigned) is keyed by source IP
/// rather than pubkey; GETs are never passed through `check` at all, so
/// they are implicitly unlimited.
fn default_limits() -> HashMap<String, LimitConfig> {
    [
        ("register", LimitConfig { window_seconds: 60, max_requests: 1 }),
        ("write", LimitConfig { window_seconds: 60, max_requests: 1 }),
        ("ownership", LimitConfig { window_seconds: 60, max_requests: 1 }),
        ("integrity", LimitConfig { window_seconds: 60, max_requests: 1 }),
        ("taxonomy", LimitConfig { window_seconds: 60, max_requests: 1 }),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl InProcessRateLimiter {
    pub fn new(overrides_json: &str) -> Self {
        let mut limits = default_limits();
        if !overrides_json.trim().is_empty()
            && let Ok(overrides) = serde_json::from_str::<HashMap<String, LimitConfig>>(overrides_json)
        {
            limits.extend(overrides);
        }
        InProcessRateLimiter { limits, counters: Mutex::new(HashMap::new()) }
    }

    /// `class` is the endpoint class (e.g. "write"); `key` is the caller
    /// identity (pubkey, or source IP for unsigned reads).
    pub fn check(&self, class: &str, key: &str) -> Result<(), RateLimited> {
        let Some(limit) = self.limits.get(class) else {
            return Ok(());
        };
        let window = Duration::from_secs(limit.window_seconds);
        let mut counters = self.counters.lock();
        let entry = counters.entry((class.to_string(), key.to_string())).or_insert_with(|| WindowCounter {
            window_start: Instant::now(),
            count: 0,
        });

        if entry.window_start.elapsed() >= window {
            entry.window_start = Instant::now();
            entry.count = 0;
        }

        if entry.count >= limit.max_requests {
            let remaining = window.saturating_sub(entry.window_start.elapsed());
            return Err(RateLimited { retry_after_seconds: remaining.as_secs().max(1) });
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_the_single_request_the_limit_grants() {
        let limiter = InProcessRateLimiter::new("");
        assert!(limiter.check("write", "ed25519:abc").is_ok());
    }

    #[test]
    fn rejects_once_the_limit_is_exceeded() {
        let limiter = InProcessRateLimiter::new("");
        limiter.check("write", "ed25519:abc").unwrap();
        assert!(limiter.check("write", "ed25519:abc").is_err());
    }

    #[test]
    fn separate_keys_have_independent_windows() {
        let limiter = InProcessRateLimiter::new("");
        limiter.check("write", "ed25519:abc").unwrap();
        assert!(limiter.check("write", "ed25519:def").is_ok());
    }

    #[test]
    fn overrides_replace_the_default_for_that_class() {
        let limiter = InProcessRateLimiter::new(r#"{"write":{"window_seconds":60,"max_requests":2}}"#);
        assert!(limiter.check("write", "k").is_ok());
        assert!(limiter.check("write", "k").is_ok());
        assert!(limiter.check("write", "k").is_err());
    }

    #[test]
    fn unknown_class_is_unrestricted() {
        let limiter = InProcessRateLimiter::new("");
        for _ in 0..1000 {
            assert!(limiter.check("nonexistent", "k").is_ok());
        }
    }
}
