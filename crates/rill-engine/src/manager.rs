//! Multi-session coordination.
//!
//! The [`SessionManager`] owns every connected session, the registered call
//! graphs, and the bookkeeping of active runs. All compute is delegated to
//! the shared [`WorkerPool`]; the manager only routes messages, spawns one
//! driver task per run, and enforces the shutdown protocol.
//!
//! Request-level errors (unknown graph, duplicate run id, unknown
//! placeholder) are reported to the requesting client as `RunFailed` and
//! never tear down the session, let alone the server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rill_pool::WorkerPool;
use rill_types::{CallGraph, FromServer, ToServer};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::run::{self, required_nodes, RunContext, RunState};
use crate::session::{Session, SessionId};

// ── Manager ──────────────────────────────────────────────────────────────────

pub struct SessionManager {
    pool: WorkerPool,
    graphs: Mutex<HashMap<String, Arc<CallGraph>>>,
    // Shared with the per-run driver tasks for completion bookkeeping.
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    shutdown_tx: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

struct RunHandle {
    session: SessionId,
    cancel: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(pool: WorkerPool) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pool,
            graphs: Mutex::new(HashMap::new()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Resolves once [`shutdown`](Self::shutdown) has completed; the
    /// transport uses this to stop accepting connections.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Make a compiled graph available to clients under `name`. Re-registering
    /// a name replaces the graph for runs started afterwards.
    pub fn register_graph(&self, name: &str, graph: CallGraph) {
        info!(graph = name, nodes = graph.nodes().len(), "graph registered");
        self.graphs
            .lock()
            .expect("graph map poisoned")
            .insert(name.to_string(), Arc::new(graph));
    }

    /// Admit a new client. Messages for the client are pushed on `outgoing`;
    /// the transport drains that channel into the connection.
    pub fn connect(&self, outgoing: mpsc::Sender<FromServer>) -> SessionId {
        let session = Session::new(outgoing);
        let id = session.id;
        info!(session_id = %id, "session connected");
        self.sessions
            .lock()
            .expect("session map poisoned")
            .insert(id, session);
        id
    }

    /// Remove a session and cancel every run it owns. Other sessions are
    /// unaffected.
    pub fn disconnect(&self, session_id: SessionId) {
        let removed = self
            .sessions
            .lock()
            .expect("session map poisoned")
            .remove(&session_id);
        if removed.is_none() {
            return;
        }
        info!(session_id = %session_id, "session disconnected");

        let runs = self.runs.lock().expect("run map poisoned");
        for (run_id, handle) in runs.iter() {
            if handle.session == session_id {
                info!(run_id = %run_id, "cancelling run of disconnected session");
                let _ = handle.cancel.send(true);
            }
        }
    }

    /// Dispatch one client message. Returns an error only for conditions the
    /// transport must handle (an unknown session); everything run-related is
    /// reported back on the session's own channel.
    pub async fn handle_message(&self, session_id: SessionId, msg: ToServer) -> Result<()> {
        let outgoing = {
            let sessions = self.sessions.lock().expect("session map poisoned");
            sessions
                .get(&session_id)
                .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?
                .outgoing
                .clone()
        };

        match msg {
            ToServer::RunRequest {
                run_id,
                graph_ref,
                placeholders,
            } => {
                self.start_run(session_id, &outgoing, run_id, graph_ref, placeholders)
                    .await
            }

            ToServer::CancelRequest { run_id } => {
                let runs = self.runs.lock().expect("run map poisoned");
                match runs.get(&run_id) {
                    Some(handle) if handle.session == session_id => {
                        info!(run_id = %run_id, "cancel requested");
                        let _ = handle.cancel.send(true);
                    }
                    // Ignored rather than failed: the run may have finished
                    // in the window before the request arrived.
                    _ => warn!(run_id = %run_id, "cancel for unknown or foreign run ignored"),
                }
                Ok(())
            }

            ToServer::StatsRequest => {
                let stats = self.pool.cache().stats();
                let _ = outgoing
                    .send(FromServer::StatsResponse {
                        lookups: stats.lookups,
                        hits: stats.hits,
                        misses: stats.misses,
                        entries: stats.entries,
                    })
                    .await;
                Ok(())
            }

            ToServer::Shutdown => {
                self.shutdown().await;
                let _ = outgoing.send(FromServer::Shutdown).await;
                Ok(())
            }
        }
    }

    /// Cancel all runs across all sessions and drain the worker pool.
    /// Idempotent; later calls return once the first has run.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("server shutdown initiated");

        {
            let runs = self.runs.lock().expect("run map poisoned");
            for (run_id, handle) in runs.iter() {
                info!(run_id = %run_id, "cancelling run for shutdown");
                let _ = handle.cancel.send(true);
            }
        }

        self.pool.shutdown().await;
        let _ = self.shutdown_tx.send(true);
        info!("server shutdown complete");
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn start_run(
        &self,
        session_id: SessionId,
        outgoing: &mpsc::Sender<FromServer>,
        run_id: String,
        graph_ref: String,
        placeholders: Vec<String>,
    ) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return reject(outgoing, &run_id, "shutdown", &EngineError::ShuttingDown).await;
        }

        let graph = {
            let graphs = self.graphs.lock().expect("graph map poisoned");
            graphs.get(&graph_ref).cloned()
        };
        let Some(graph) = graph else {
            let err = EngineError::UnknownGraph(graph_ref);
            return reject(outgoing, &run_id, "unknown_graph", &err).await;
        };

        let requested: std::collections::BTreeSet<String> = placeholders.into_iter().collect();
        let needed = match required_nodes(&graph, &requested) {
            Ok(needed) => needed,
            Err(err) => return reject(outgoing, &run_id, "unknown_placeholder", &err).await,
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let duplicate = {
            let mut runs = self.runs.lock().expect("run map poisoned");
            if runs.contains_key(&run_id) {
                true
            } else {
                runs.insert(
                    run_id.clone(),
                    RunHandle {
                        session: session_id,
                        cancel: cancel_tx,
                    },
                );
                let mut sessions = self.sessions.lock().expect("session map poisoned");
                if let Some(session) = sessions.get_mut(&session_id) {
                    session.add_run(&run_id);
                }
                false
            }
        };
        if duplicate {
            let err = EngineError::DuplicateRun(run_id.clone());
            return reject(outgoing, &run_id, "duplicate_run", &err).await;
        }

        let ctx = RunContext {
            run_id: run_id.clone(),
            graph,
            requested,
            needed,
            pool: self.pool.clone(),
            outgoing: outgoing.clone(),
            cancel: cancel_rx,
        };
        let runs = Arc::clone(&self.runs);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            let state = run::drive_run(ctx).await;
            finish_run(&runs, &sessions, &run_id, state);
        });
        Ok(())
    }
}

/// Run-completion bookkeeping shared with the driver tasks.
fn finish_run(
    runs: &Mutex<HashMap<String, RunHandle>>,
    sessions: &Mutex<HashMap<SessionId, Session>>,
    run_id: &str,
    state: RunState,
) {
    info!(run_id = %run_id, %state, "run finished");
    let handle = runs.lock().expect("run map poisoned").remove(run_id);
    if let Some(handle) = handle {
        let mut sessions = sessions.lock().expect("session map poisoned");
        if let Some(session) = sessions.get_mut(&handle.session) {
            session.remove_run(run_id);
        }
    }
}

/// Report a request-level failure to the client without starting the run.
async fn reject(
    outgoing: &mpsc::Sender<FromServer>,
    run_id: &str,
    error_kind: &str,
    err: &EngineError,
) -> Result<()> {
    warn!(run_id = %run_id, error_kind, %err, "run request rejected");
    let _ = outgoing
        .send(FromServer::RunFailed {
            run_id: run_id.to_string(),
            error_kind: error_kind.to_string(),
            message: err.to_string(),
        })
        .await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
