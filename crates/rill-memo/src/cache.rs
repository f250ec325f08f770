//! Pool-wide memoization cache.
//!
//! One instance is shared by every worker. Lookups and stores are short
//! critical sections behind a single mutex; cumulative counters are atomics
//! so [`MemoCache::stats`] never blocks cache mutation.
//!
//! Store semantics are first-write-wins: when two workers race to compute
//! the same fingerprint, the first stored value sticks and the late writer's
//! value is discarded. Every waiter of that fingerprint then observes the
//! same result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rill_types::{CacheConfig, Value};
use tracing::{debug, info};

use crate::eviction::{score, CallableStats};
use crate::fingerprint::CallFingerprint;

// ── Entries ──────────────────────────────────────────────────────────────────

struct CacheEntry {
    /// Shared, read-only after insertion.
    value: Arc<Value>,
    size_bytes: usize,
    callable: String,
}

/// Cumulative counters, snapshotted without blocking mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

// ── Cache ────────────────────────────────────────────────────────────────────

pub struct MemoCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    entries: AtomicU64,
}

struct CacheInner {
    values: HashMap<CallFingerprint, CacheEntry>,
    per_callable: HashMap<String, CallableStats>,
    size_bytes: usize,
}

impl MemoCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                values: HashMap::new(),
                per_callable: HashMap::new(),
                size_bytes: 0,
            }),
            config,
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            entries: AtomicU64::new(0),
        }
    }

    /// Probe the cache. `Some` is a hit; `None` obliges the caller to
    /// compute the value and attempt a [`store`](Self::store).
    pub fn lookup(&self, fp: &CallFingerprint) -> Option<Arc<Value>> {
        let started = Instant::now();
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock().expect("memo cache mutex poisoned");
        let found = inner
            .values
            .get(fp)
            .map(|entry| (Arc::clone(&entry.value), entry.callable.clone()));
        match found {
            Some((value, callable)) => {
                inner
                    .per_callable
                    .entry(callable)
                    .or_default()
                    .update_on_hit(started.elapsed().as_nanos() as u64);
                drop(inner);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                drop(inner);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a computed value. First-write-wins: if another worker already
    /// stored this fingerprint, the existing value is returned and `value`
    /// is dropped. `computation` is the time the caller spent producing the
    /// value; it feeds the eviction statistics.
    pub fn store(
        &self,
        fp: CallFingerprint,
        callable: &str,
        value: Value,
        computation: Duration,
    ) -> Arc<Value> {
        let size_bytes = value.approx_size();
        let mut inner = self.inner.lock().expect("memo cache mutex poisoned");

        if let Some(existing) = inner.values.get(&fp) {
            debug!(%fp, callable, "losing concurrent store discarded");
            return Arc::clone(&existing.value);
        }

        if let Some(max_bytes) = self.config.max_bytes {
            Self::ensure_capacity(&mut inner, max_bytes, size_bytes, self.config.eviction, &self.entries);
        }

        let value = Arc::new(value);
        inner.values.insert(
            fp,
            CacheEntry {
                value: Arc::clone(&value),
                size_bytes,
                callable: callable.to_string(),
            },
        );
        inner.size_bytes += size_bytes;
        inner
            .per_callable
            .entry(callable.to_string())
            .or_default()
            .update_on_miss(0, computation.as_nanos() as u64, size_bytes);
        self.entries.fetch_add(1, Ordering::Relaxed);

        info!(
            %fp,
            callable,
            size_bytes,
            computation_us = computation.as_micros() as u64,
            "memoized call result"
        );
        value
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
        }
    }

    /// Current estimated footprint of all cached values.
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().expect("memo cache mutex poisoned").size_bytes
    }

    /// Free cache space until `needed` bytes fit under `max_bytes`, evicting
    /// whole callables in eviction-score order. A no-op when the needed
    /// capacity exceeds the limit outright.
    fn ensure_capacity(
        inner: &mut CacheInner,
        max_bytes: usize,
        needed: usize,
        eviction: rill_types::EvictionOrder,
        entries: &AtomicU64,
    ) {
        while max_bytes.saturating_sub(inner.size_bytes) < needed && needed < max_bytes {
            let worst = inner
                .per_callable
                .iter()
                .min_by(|a, b| {
                    score(eviction, a.1)
                        .partial_cmp(&score(eviction, b.1))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(name, _)| name.clone());

            let Some(callable) = worst else { break };

            let mut freed = 0usize;
            let mut removed = 0u64;
            inner.values.retain(|_, entry| {
                if entry.callable == callable {
                    freed += entry.size_bytes;
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            inner.per_callable.remove(&callable);
            inner.size_bytes -= freed;
            entries.fetch_sub(removed, Ordering::Relaxed);

            info!(callable = %callable, freed, removed, "evicted callable from cache");
            if removed == 0 {
                // Stats existed but no entries: nothing more to free.
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{fingerprint, FingerprintOutcome};
    use rill_types::EvictionOrder;

    fn fp(callable: &str, arg: i64) -> CallFingerprint {
        match fingerprint(callable, &[Value::Int(arg)], &[]) {
            FingerprintOutcome::Hashed(fp) => fp,
            FingerprintOutcome::Unhashable => unreachable!(),
        }
    }

    #[test]
    fn store_then_lookup_returns_stored_value() {
        let cache = MemoCache::new(CacheConfig::default());
        let key = fp("f", 1);

        assert!(cache.lookup(&key).is_none());
        cache.store(key, "f", Value::Int(99), Duration::from_micros(5));
        assert_eq!(*cache.lookup(&key).unwrap(), Value::Int(99));

        let stats = cache.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn first_write_wins() {
        let cache = MemoCache::new(CacheConfig::default());
        let key = fp("f", 1);

        cache.store(key, "f", Value::Int(1), Duration::ZERO);
        let kept = cache.store(key, "f", Value::Int(2), Duration::ZERO);

        assert_eq!(*kept, Value::Int(1));
        assert_eq!(*cache.lookup(&key).unwrap(), Value::Int(1));
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn concurrent_stores_keep_one_value() {
        let cache = Arc::new(MemoCache::new(CacheConfig::default()));
        let key = fp("f", 7);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.store(key, "f", Value::Int(i), Duration::ZERO);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.stats().entries, 1);
        // Whichever store won, every subsequent lookup agrees with it.
        let first = cache.lookup(&key).unwrap();
        let second = cache.lookup(&key).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn capacity_limit_evicts_whole_callables() {
        let config = CacheConfig {
            max_bytes: Some(4096),
            eviction: EvictionOrder::Lru,
        };
        let cache = MemoCache::new(config);

        // Fill with large values under one callable.
        for i in 0..8 {
            cache.store(
                fp("bulk", i),
                "bulk",
                Value::Text("x".repeat(512)),
                Duration::from_micros(1),
            );
        }
        assert!(cache.size_bytes() <= 4096 + 1024);

        // The limit keeps holding as a second callable arrives.
        cache.store(
            fp("other", 0),
            "other",
            Value::Text("y".repeat(2048)),
            Duration::from_micros(1),
        );
        assert!(cache.size_bytes() <= 4096);
        assert!(cache.lookup(&fp("other", 0)).is_some());
    }

    #[test]
    fn unbounded_cache_never_evicts() {
        let cache = MemoCache::new(CacheConfig::default());
        for i in 0..64 {
            cache.store(fp("f", i), "f", Value::Text("x".repeat(256)), Duration::ZERO);
        }
        assert_eq!(cache.stats().entries, 64);
    }
}
