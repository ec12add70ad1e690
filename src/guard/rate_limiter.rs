//! Fixed-window request counter with CAPTCHA escalation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::sweeper::Sweep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub key: String,
    pub count: u32,
    pub window_reset_at: u64,
    pub captcha_required: bool,
    pub captcha_verified: bool,
}

impl RateWindow {
    fn fresh(key: &str, now: u64, window: Duration) -> Self {
        Self {
            key: key.to_string(),
            count: 1,
            window_reset_at: now.saturating_add(window.as_millis() as u64),
            captcha_required: false,
            captcha_verified: false,
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        now > self.window_reset_at
    }
}

/// Values surfaced as `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: u64,
}

pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    limit: u32,
    captcha_threshold: u32,
    window: Duration,
    captcha_credit_divisor: u32,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            limit: config.limit,
            captcha_threshold: config.captcha_threshold,
            window: config.window(),
            captcha_credit_divisor: config.captcha_credit_divisor.max(1),
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request for `key` and report whether it must be rejected.
    pub fn is_rate_limited(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut occupied = match self.windows.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(RateWindow::fresh(key, now, self.window));
                return false;
            }
            Entry::Occupied(slot) => slot,
        };

        let window = occupied.get_mut();
        if window.is_expired(now) {
            *window = RateWindow::fresh(key, now, self.window);
            return false;
        }

        window.count = window.count.saturating_add(1);
        if window.count > self.captcha_threshold {
            window.captcha_required = true;
        }

        let blocked = !window.captcha_verified
            && (window.captcha_required || window.count > self.limit);
        if blocked {
            tracing::warn!(
                client_key = key,
                count = window.count,
                captcha_required = window.captcha_required,
                "request rate limited"
            );
        }
        blocked
    }

    pub fn requires_captcha(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.windows
            .get(key)
            .map(|w| !w.is_expired(now) && w.captcha_required && !w.captcha_verified)
            .unwrap_or(false)
    }

    /// Record a solved challenge: the client regains `limit / divisor` worth of budget.
    pub fn set_captcha_verified(&self, key: &str) {
        let credit = self.limit / self.captcha_credit_divisor;
        if let Some(mut window) = self.windows.get_mut(key) {
            window.captcha_verified = true;
            window.count = credit;
        }
    }

    pub fn remaining(&self, key: &str) -> u32 {
        let now = self.clock.now_ms();
        match self.windows.get(key) {
            Some(w) if !w.is_expired(now) => self.limit.saturating_sub(w.count),
            _ => self.limit,
        }
    }

    pub fn reset_time(&self, key: &str) -> u64 {
        let now = self.clock.now_ms();
        match self.windows.get(key) {
            Some(w) if !w.is_expired(now) => w.window_reset_at,
            _ => now.saturating_add(self.window.as_millis() as u64),
        }
    }

    pub fn snapshot(&self, key: &str) -> RateLimitInfo {
        RateLimitInfo {
            limit: self.limit,
            remaining: self.remaining(key),
            reset_at: self.reset_time(key),
        }
    }

    pub fn window(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|w| w.value().clone())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Sweep for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_expired(now));
        before.saturating_sub(self.windows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, threshold: u32) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = RateLimitConfig {
            limit,
            captcha_threshold: threshold,
            window_secs: 60,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(&config, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn escalates_to_captcha_after_threshold() {
        let (_, rl) = limiter(10, 15);
        for i in 1..=10 {
            assert!(!rl.is_rate_limited("1.2.3.4"), "request {i} should pass");
        }
        for i in 11..=15 {
            assert!(rl.is_rate_limited("1.2.3.4"), "request {i} should be blocked");
            assert!(!rl.requires_captcha("1.2.3.4"));
        }
        assert!(rl.is_rate_limited("1.2.3.4"));
        assert!(rl.requires_captcha("1.2.3.4"));
    }

    #[test]
    fn keys_are_independent() {
        let (_, rl) = limiter(1, 5);
        assert!(!rl.is_rate_limited("a"));
        assert!(rl.is_rate_limited("a"));
        assert!(!rl.is_rate_limited("b"));
    }

    #[test]
    fn window_resets_after_expiry() {
        let (clock, rl) = limiter(2, 3);
        for _ in 0..5 {
            rl.is_rate_limited("k");
        }
        assert!(rl.requires_captcha("k"));
        clock.advance(Duration::from_secs(61));
        assert!(!rl.requires_captcha("k"));
        assert!(!rl.is_rate_limited("k"));
        assert_eq!(rl.window("k").map(|w| w.count), Some(1));
    }

    #[test]
    fn verified_captcha_grants_half_budget() {
        let (_, rl) = limiter(10, 15);
        for _ in 0..16 {
            rl.is_rate_limited("k");
        }
        assert!(rl.requires_captcha("k"));
        rl.set_captcha_verified("k");

        assert_eq!(rl.remaining("k"), 5);
        assert!(!rl.requires_captcha("k"));
        // verified clients are never blocked inside the same window
        for _ in 0..20 {
            assert!(!rl.is_rate_limited("k"));
        }
    }

    #[test]
    fn remaining_and_reset_for_unknown_key() {
        let (clock, rl) = limiter(10, 15);
        assert_eq!(rl.remaining("nobody"), 10);
        assert_eq!(rl.reset_time("nobody"), clock.now_ms() + 60_000);
    }

    #[test]
    fn snapshot_tracks_count() {
        let (clock, rl) = limiter(10, 15);
        let start = clock.now_ms();
        rl.is_rate_limited("k");
        rl.is_rate_limited("k");
        clock.advance(Duration::from_secs(1));
        let info = rl.snapshot("k");
        assert_eq!(info, RateLimitInfo { limit: 10, remaining: 8, reset_at: start + 60_000 });
    }

    #[test]
    fn sweep_drops_stale_windows() {
        let (clock, rl) = limiter(10, 15);
        rl.is_rate_limited("old");
        clock.advance(Duration::from_secs(30));
        rl.is_rate_limited("new");
        clock.advance(Duration::from_secs(31));
        assert_eq!(rl.sweep_expired(), 1);
        assert_eq!(rl.tracked_keys(), 1);
    }
}
