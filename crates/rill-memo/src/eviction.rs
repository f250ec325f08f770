//! Pluggable eviction ordering.
//!
//! When the cache is over capacity it frees whole callables at a time: all
//! entries of the lowest-scored callable go first. The scoring key is
//! selected by [`EvictionOrder`]; per-callable statistics accumulate on
//! every hit and miss.

use std::time::Instant;

use rill_types::EvictionOrder;

// ── Per-callable statistics ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CallableStats {
    pub last_access: Instant,
    /// Total lookups against entries of this callable (hits + misses).
    pub lookups: u64,
    /// Lookups that missed and required a computation.
    pub computations: u64,
    pub lookup_ns_total: u64,
    pub computation_ns_total: u64,
    pub bytes_total: usize,
}

impl CallableStats {
    pub fn new() -> Self {
        Self {
            last_access: Instant::now(),
            lookups: 0,
            computations: 0,
            lookup_ns_total: 0,
            computation_ns_total: 0,
            bytes_total: 0,
        }
    }

    pub fn update_on_hit(&mut self, lookup_ns: u64) {
        self.last_access = Instant::now();
        self.lookups += 1;
        self.lookup_ns_total += lookup_ns;
    }

    pub fn update_on_miss(&mut self, lookup_ns: u64, computation_ns: u64, bytes: usize) {
        self.last_access = Instant::now();
        self.lookups += 1;
        self.computations += 1;
        self.lookup_ns_total += lookup_ns;
        self.computation_ns_total += computation_ns;
        self.bytes_total += bytes;
    }

    fn avg_lookup_ns(&self) -> f64 {
        self.lookup_ns_total as f64 / self.lookups.max(1) as f64
    }

    fn avg_computation_ns(&self) -> f64 {
        self.computation_ns_total as f64 / self.computations.max(1) as f64
    }

    fn avg_bytes(&self) -> f64 {
        self.bytes_total as f64 / self.computations.max(1) as f64
    }
}

impl Default for CallableStats {
    fn default() -> Self {
        Self::new()
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Eviction score for one callable. Lowest scores are evicted first.
pub fn score(order: EvictionOrder, stats: &CallableStats) -> f64 {
    match order {
        // Most misses per lookup first.
        EvictionOrder::MissRate => {
            -(stats.computations as f64 / stats.lookups.max(1) as f64)
        }
        // Oldest access first.
        EvictionOrder::Lru => -stats.last_access.elapsed().as_secs_f64(),
        // Newest access first.
        EvictionOrder::Mru => stats.last_access.elapsed().as_secs_f64(),
        // Least time saved by caching first.
        EvictionOrder::TimeSaved => stats.avg_computation_ns() - stats.avg_lookup_ns(),
        // Cheapest-to-recompute-per-byte first.
        EvictionOrder::Priority => stats.avg_computation_ns() / stats.avg_bytes().max(1.0),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
