//! An optional keyed rate limiter consulted once at session accept.
//!
//! The core only needs the [`RateLimiter`] trait (see [`crate::hooks`]); this
//! module supplies one concrete, dependency-free implementation — a sliding
//! window counter keyed on an arbitrary string (typically the remote IP) —
//! so the crate is usable without requiring every embedder to bring their
//! own limiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::hooks::RateLimiter;

/// A sliding-window request counter: a key is allowed up to `max_requests`
/// observations in any trailing `window`.
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        SlidingWindowRateLimiter {
            max_requests,
            window,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Drops windows whose every recorded timestamp has aged out. Intended
    /// to be called periodically by an embedder running a background sweep
    /// task; never required for correctness since `is_allowed` also prunes
    /// the key it inspects.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock().unwrap();
        match state.get(key) {
            Some(timestamps) => {
                let count = timestamps
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count();
                count < self.max_requests
            }
            None => true,
        }
    }

    async fn record_request(&self, key: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        entry.push(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let limiter = SlidingWindowRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.is_allowed("1.2.3.4").await);
        limiter.record_request("1.2.3.4").await;
        assert!(limiter.is_allowed("1.2.3.4").await);
        limiter.record_request("1.2.3.4").await;
        assert!(!limiter.is_allowed("1.2.3.4").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60));
        limiter.record_request("a").await;
        assert!(!limiter.is_allowed("a").await);
        assert!(limiter.is_allowed("b").await);
    }

    #[tokio::test]
    async fn sweep_drops_fully_aged_out_keys() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_millis(10));
        limiter.record_request("a").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.sweep();
        assert!(limiter.state.lock().unwrap().get("a").is_none());
    }
}
