//! `rill-pool` — the bounded pool of long-lived workers that executes
//! pipeline calls.
//!
//! Workers are pre-warmed tasks over a [`CallableRegistry`]; each dispatched
//! call is fingerprinted, checked against the shared memoization cache, and
//! only computed on a miss. A worker dying mid-call is contained to that one
//! call: the pool replaces the worker and surfaces a single
//! [`PoolError::WorkerFailure`].

pub mod error;
pub mod pool;
pub mod registry;
mod worker;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use error::{CallError, PoolError};
pub use pool::{CallRequest, WorkerPool};
pub use registry::{CallableRegistry, CallArgs};
pub use worker::WorkerId;
