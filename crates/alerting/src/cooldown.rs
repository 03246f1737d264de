//! Cooldown Cache Implementation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::Fingerprint;

/// Cooldown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Whether the cooldown gate is applied at all
    pub enabled: bool,
    /// Cooldown period between duplicate alerts (seconds)
    pub ttl_seconds: u64,
    /// Maximum tracked keys before oldest-first eviction
    pub max_size: usize,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3600, // 60 minutes
            max_size: 5000,
        }
    }
}

impl CooldownConfig {
    /// Cooldown period as a `Duration`
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Time-windowed deduplication cache.
///
/// Records when a key was last sent and answers whether a new send would fall
/// inside the cooldown window. Safe to share between request handlers and the
/// inventory monitor behind an `Arc`; every operation takes the same lock, so
/// calls on one key are linearizable.
pub struct CooldownCache<K = Fingerprint> {
    ttl: Duration,
    max_size: usize,
    entries: Mutex<HashMap<K, Instant>>,
}

impl<K> CooldownCache<K>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
{
    /// Create a new cache
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create a cache from configuration
    pub fn from_config(config: &CooldownConfig) -> Self {
        Self::new(config.ttl(), config.max_size)
    }

    /// Record that `key` was sent now
    pub fn touch(&self, key: K) {
        self.touch_at(key, Instant::now());
    }

    /// Record that `key` was sent at `now`
    pub fn touch_at(&self, key: K, now: Instant) {
        let mut entries = self.lock();
        entries.insert(key, now);
        self.evict(&mut entries, now);
    }

    /// Whether `key` was sent within the cooldown window
    pub fn is_within_cooldown(&self, key: &K) -> bool {
        self.is_within_cooldown_at(key, Instant::now())
    }

    /// Whether `key` was sent within the cooldown window, as seen at `now`
    pub fn is_within_cooldown_at(&self, key: &K, now: Instant) -> bool {
        let entries = self.lock();
        Self::fresh(entries.get(key), now, self.ttl)
    }

    /// Gate a send: returns `false` if `key` is cooling down, otherwise
    /// records the send and returns `true`.
    pub fn check_and_touch(&self, key: K) -> bool {
        self.check_and_touch_at(key, Instant::now())
    }

    /// Same as [`check_and_touch`](Self::check_and_touch) with an explicit clock
    pub fn check_and_touch_at(&self, key: K, now: Instant) -> bool {
        let mut entries = self.lock();
        if Self::fresh(entries.get(&key), now, self.ttl) {
            debug!("Cooldown active for {:?}", key);
            return false;
        }
        entries.insert(key, now);
        self.evict(&mut entries, now);
        true
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache tracks no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(last_seen: Option<&Instant>, now: Instant, ttl: Duration) -> bool {
        match last_seen {
            Some(ts) => now.saturating_duration_since(*ts) <= ttl,
            None => false,
        }
    }

    fn evict(&self, entries: &mut HashMap<K, Instant>, now: Instant) {
        let ttl = self.ttl;
        entries.retain(|_, ts| now.saturating_duration_since(*ts) <= ttl);

        if entries.len() > self.max_size {
            let mut by_age: Vec<(K, Instant)> =
                entries.iter().map(|(k, ts)| (k.clone(), *ts)).collect();
            by_age.sort_by_key(|(_, ts)| *ts);
            let excess = entries.len() - self.max_size;
            for (key, _) in by_age.into_iter().take(excess) {
                entries.remove(&key);
            }
            debug!("Cooldown cache evicted {} oldest entries", excess);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CooldownCache {
    fn default() -> Self {
        Self::from_config(&CooldownConfig::default())
    }
}
