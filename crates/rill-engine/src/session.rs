//! Per-client session bookkeeping.
//!
//! A session is one connected client: an outgoing message channel plus the
//! set of runs it owns. Sessions never share runs; disconnecting a session
//! cancels exactly its own runs and nothing else.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rill_types::FromServer;
use tokio::sync::mpsc;
use uuid::Uuid;

// ── Session identity ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Messages destined for this client. The transport end drains this.
    pub outgoing: mpsc::Sender<FromServer>,
    runs: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(outgoing: mpsc::Sender<FromServer>) -> Self {
        Self {
            id: SessionId::generate(),
            outgoing,
            runs: HashSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn add_run(&mut self, run_id: &str) {
        self.runs.insert(run_id.to_string());
    }

    pub fn remove_run(&mut self, run_id: &str) {
        self.runs.remove(run_id);
    }

    pub fn owns_run(&self, run_id: &str) -> bool {
        self.runs.contains(run_id)
    }

    pub fn run_ids(&self) -> impl Iterator<Item = &str> {
        self.runs.iter().map(String::as_str)
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
