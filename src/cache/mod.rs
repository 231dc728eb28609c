//! Multi-tier caching for the OAuth integration system.
//!
//! Each tier is a bounded least-recently-used map with a tier-wide TTL and
//! an optional per-entry absolute expiry. Every `get` records a hit or a
//! miss against a shared metrics collector keyed by tier name; an entry
//! found expired counts as a miss. Caches are read-through: a miss always
//! falls back to the source of truth, and nothing here survives a process
//! restart.

mod manager;

pub use manager::{CacheHealth, CacheManager, CacheManagerStats, IntegrationMeta, OAuthStateEntry};

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::config::TierConfig;

/// Shared hit/miss counters, keyed by tier name.
///
/// Owned by the composition root (one per `CacheManager`), not a process
/// global, so independent managers can coexist in tests.
pub struct CacheMetrics {
    hits: DashMap<&'static str, u64>,
    misses: DashMap<&'static str, u64>,
}

/// Hit/miss counts and computed rate for one tier
#[derive(Clone, Debug)]
pub struct TierMetrics {
    pub tier: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            hits: DashMap::new(),
            misses: DashMap::new(),
        }
    }

    pub fn record_hit(&self, tier: &'static str) {
        *self.hits.entry(tier).or_insert(0) += 1;
    }

    pub fn record_miss(&self, tier: &'static str) {
        *self.misses.entry(tier).or_insert(0) += 1;
    }

    /// Hit rate as a percentage; 0 when the tier has not been accessed.
    pub fn hit_rate(&self, tier: &'static str) -> f64 {
        let hits = self.hits.get(tier).map(|v| *v).unwrap_or(0);
        let misses = self.misses.get(tier).map(|v| *v).unwrap_or(0);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64 * 100.0
    }

    pub fn tier_metrics(&self, tier: &'static str) -> TierMetrics {
        TierMetrics {
            tier,
            hits: self.hits.get(tier).map(|v| *v).unwrap_or(0),
            misses: self.misses.get(tier).map(|v| *v).unwrap_or(0),
            hit_rate: self.hit_rate(tier),
        }
    }

    pub fn reset(&self) {
        self.hits.clear();
        self.misses.clear();
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Size and hit-rate snapshot for one tier
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    /// Tier-TTL deadline, fixed at insertion
    fresh_until: DateTime<Utc>,
    /// Per-entry absolute expiry, for tiers whose entries carry their own
    /// lifetime (OAuth state)
    expires_at: Option<DateTime<Utc>>,
    /// Recency stamp for LRU eviction
    last_used: u64,
}

struct TierInner<K, V> {
    map: HashMap<K, Entry<V>>,
    clock: u64,
}

/// One bounded LRU/TTL cache tier.
///
/// Values are cloned out on `get`; value types that wrap key material in
/// `Zeroizing` are scrubbed when their entry is evicted or invalidated,
/// since eviction is a plain `Drop`.
pub struct TierCache<K, V> {
    name: &'static str,
    capacity: usize,
    ttl: Duration,
    metrics: Arc<CacheMetrics>,
    inner: Mutex<TierInner<K, V>>,
}

impl<K, V> TierCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, config: &TierConfig, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            name,
            capacity: config.capacity.max(1),
            ttl: Duration::seconds(config.ttl_seconds as i64),
            metrics,
            inner: Mutex::new(TierInner {
                map: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Returns the cached value, recording a hit or miss. Entries past the
    /// tier TTL or their own absolute expiry are removed and count as a
    /// miss even before LRU pressure would evict them.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;

        match inner.map.get_mut(key) {
            None => {
                self.metrics.record_miss(self.name);
                return None;
            }
            Some(entry) => {
                let expired =
                    now >= entry.fresh_until || entry.expires_at.map_or(false, |e| now >= e);
                if !expired {
                    entry.last_used = clock;
                    self.metrics.record_hit(self.name);
                    return Some(entry.value.clone());
                }
            }
        }

        inner.map.remove(key);
        self.metrics.record_miss(self.name);
        None
    }

    pub fn set(&self, key: K, value: V) {
        self.set_with_expiry(key, value, None);
    }

    /// Inserts with an additional absolute expiry. Evicts the
    /// least-recently-used entry when at capacity.
    pub fn set_with_expiry(&self, key: K, value: V, expires_at: Option<DateTime<Utc>>) {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        if inner.map.len() >= self.capacity && !inner.map.contains_key(&key) {
            let lru = inner
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(lru_key) = lru {
                inner.map.remove(&lru_key);
            }
        }

        inner.clock += 1;
        let clock = inner.clock;
        inner.map.insert(
            key,
            Entry {
                value,
                fresh_until: now + self.ttl,
                expires_at,
                last_used: clock,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.lock().unwrap().map.remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hit_rate: self.metrics.hit_rate(self.name),
        }
    }
}
