//! `rill-memo` — stable call hashing and the pool-wide memoization cache.
//!
//! Two calls with structurally equal arguments produce the same
//! [`CallFingerprint`] regardless of call site or keyword ordering, and the
//! [`MemoCache`] maps fingerprints to computed values with first-write-wins
//! semantics so every concurrent waiter of a fingerprint eventually observes
//! the same result.

pub mod cache;
pub mod eviction;
pub mod fingerprint;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use cache::{CacheStats, MemoCache};
pub use fingerprint::{fingerprint, CallFingerprint, FingerprintOutcome};
