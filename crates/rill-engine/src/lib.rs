//! `rill-engine` — coordination layer for pipeline execution.
//!
//! This crate is a **coordination layer**, not a compute layer. The actual
//! call bodies execute inside `rill-pool` workers; the engine decides which
//! calls a run needs (partial evaluation against the requested
//! placeholders), streams resolved placeholders back to the owning session,
//! and contains failures to the smallest scope that preserves correctness:
//! call → run → session → process.
//!
//! # Architecture
//!
//! ```text
//! client ──frames──▶ SessionManager ──runs──▶ drive_run ──calls──▶ WorkerPool
//!    ▲                    │                      │                    │
//!    └──── placeholders ──┴──────────────────────┘        MemoCache ──┘
//! ```

pub mod error;
pub mod manager;
pub mod run;
pub mod session;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use error::{EngineError, Result};
pub use manager::SessionManager;
pub use run::{required_nodes, RunState};
pub use session::{Session, SessionId};
