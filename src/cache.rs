use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::clock::Clock;
use crate::sweeper::Sweep;

pub const DEFAULT_EVENT_LOG_CAP: usize = 1000;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheAction {
    Set,
    Get,
    Delete,
}

/// Audit record of a single cache operation.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEvent {
    pub action: CacheAction,
    pub key: String,
    pub success: bool,
    pub at: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hit_rate: f64,
    pub recent_events: Vec<CacheEvent>,
}

/// Key/value store with per-entry TTL.
///
/// Expiry is enforced lazily by `get`/`has`; `sweep_expired` only bounds
/// memory. Nothing survives a process restart.
pub struct ExpiringCache<V> {
    entries: RwLock<AHashMap<String, CacheEntry<V>>>,
    events: Mutex<VecDeque<CacheEvent>>,
    event_cap: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_event_cap(clock, DEFAULT_EVENT_LOG_CAP)
    }

    pub fn with_event_cap(clock: Arc<dyn Clock>, event_cap: usize) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            events: Mutex::new(VecDeque::with_capacity(event_cap.min(1024))),
            event_cap: event_cap.max(1),
            clock,
        }
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let expires_at = self.clock.now_ms().saturating_add(ttl.as_millis() as u64);
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry { value, expires_at });
        self.record(CacheAction::Set, key, true);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let found = {
            let mut entries = self.entries.write();
            let found = match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
                _ => None,
            };
            if found.is_none() {
                entries.remove(key);
            }
            found
        };
        self.record(CacheAction::Get, key, found.is_some());
        found
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write();
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            entries.remove(key);
        }
        !expired
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        self.record(CacheAction::Delete, key, removed);
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, expired ones included until they are touched or swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let events = self.events.lock();
        let (hits, gets) = events
            .iter()
            .filter(|e| e.action == CacheAction::Get)
            .fold((0usize, 0usize), |(h, g), e| (h + e.success as usize, g + 1));
        let hit_rate = if gets == 0 { 0.0 } else { hits as f64 / gets as f64 };
        CacheStats {
            size: self.len(),
            hit_rate,
            recent_events: events.iter().cloned().collect(),
        }
    }

    fn record(&self, action: CacheAction, key: &str, success: bool) {
        let mut events = self.events.lock();
        events.push_back(CacheEvent {
            action,
            key: key.to_string(),
            success,
            at: self.clock.now_ms(),
        });
        while events.len() > self.event_cap {
            events.pop_front();
        }
    }
}

impl<V: Clone + Send + Sync> Sweep for ExpiringCache<V> {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, ExpiringCache<String>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let cache = ExpiringCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn set_then_get_returns_value() {
        let (_, cache) = cache();
        cache.set("cms:example.com", "WordPress".into(), Duration::from_secs(60));
        assert_eq!(cache.get("cms:example.com").as_deref(), Some("WordPress"));
        assert!(cache.has("cms:example.com"));
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let (clock, cache) = cache();
        cache.set("k", "v".into(), Duration::from_secs(1));
        clock.advance(Duration::from_millis(1_001));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn has_enforces_expiry_too() {
        let (clock, cache) = cache();
        cache.set("k", "v".into(), Duration::from_secs(5));
        clock.advance(Duration::from_secs(6));
        assert!(!cache.has("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn delete_and_clear() {
        let (_, cache) = cache();
        cache.set("a", "1".into(), Duration::from_secs(5));
        cache.set("b", "2".into(), Duration::from_secs(5));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn hit_rate_counts_only_gets() {
        let (clock, cache) = cache();
        cache.set("a", "1".into(), Duration::from_secs(5));
        cache.get("a");
        cache.get("missing");
        cache.get("a");
        clock.advance(Duration::from_secs(10));
        cache.get("a");

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.recent_events.len(), 5);
    }

    #[test]
    fn event_log_is_trimmed_from_front() {
        let clock = Arc::new(ManualClock::new(0));
        let cache: ExpiringCache<u8> = ExpiringCache::with_event_cap(clock, 3);
        for i in 0..5u8 {
            cache.set(&format!("k{i}"), i, Duration::from_secs(1));
        }
        let keys: Vec<_> = cache.stats().recent_events.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["k2", "k3", "k4"]);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (clock, cache) = cache();
        cache.set("short", "s".into(), Duration::from_secs(1));
        cache.set("long", "l".into(), Duration::from_secs(3600));
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.has("long"));
    }

    #[test]
    fn empty_stats_have_zero_hit_rate() {
        let (_, cache) = cache();
        assert_eq!(cache.stats().hit_rate, 0.0);
    }
}
