// Configuration structs shared across the workspace.

use std::time::Duration;

// ── Server ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host. Only loopback by default; connections from other
    /// devices are not accepted.
    pub host: String,
    /// TCP port. 0 = OS-assigned.
    pub port: u16,
    /// Reject any single protocol frame larger than this.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

// ── Worker pool ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently live workers.
    pub max_workers: usize,
    /// How long `shutdown` waits for in-flight calls before force-cancelling.
    pub drain_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            drain_grace: Duration::from_secs(5),
        }
    }
}

// ── Memoization cache ────────────────────────────────────────────────────────

/// Which callables get evicted first when the cache is over capacity.
///
/// Ordering keys are computed from per-callable statistics; the lowest-scored
/// callables are removed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOrder {
    /// Highest miss rate first.
    MissRate,
    /// Least recently used first.
    Lru,
    /// Most recently used first.
    Mru,
    /// Least time saved (computation time minus lookup time) first.
    TimeSaved,
    /// Lowest computation-time-to-size ratio first.
    Priority,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity limit in bytes. `None` = unbounded retention for the
    /// process lifetime.
    pub max_bytes: Option<usize>,
    pub eviction: EvictionOrder,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            eviction: EvictionOrder::Priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.max_frame_bytes, 64 * 1024 * 1024);

        let pool = PoolConfig::default();
        assert_eq!(pool.max_workers, 4);

        let cache = CacheConfig::default();
        assert!(cache.max_bytes.is_none());
        assert_eq!(cache.eviction, EvictionOrder::Priority);
    }
}
