use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Spaces out calls per endpoint key.
///
/// Each key keeps the instant at which its next call may be granted. A caller
/// reserves that slot under the map's shard lock and pushes it forward by the
/// key's interval before sleeping, so concurrent callers queue up one interval
/// apart instead of all waking at the same moment.
pub struct RateLimiter {
    next_slot: DashMap<String, Instant>,
    cfg: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self { next_slot: DashMap::new(), cfg }
    }

    /// Wait until a call for `key` is allowed.
    pub async fn acquire(&self, key: &str) {
        let wait = self.reserve(key, Instant::now());
        if !wait.is_zero() {
            debug!(endpoint = key, wait_ms = wait.as_millis() as u64, "rate limiter delaying call");
            tokio::time::sleep(wait).await;
        }
    }

    /// Reserve the next slot for `key` and return how long to wait for it.
    fn reserve(&self, key: &str, now: Instant) -> Duration {
        let interval = self.cfg.interval_for(key);
        if interval.is_zero() {
            return Duration::ZERO;
        }

        let mut slot = self.next_slot.entry(key.to_string()).or_insert(now);
        let grant_at = (*slot).max(now);
        *slot = grant_at + interval;
        grant_at.saturating_duration_since(now)
    }
}
