//! Pipeline run driver.
//!
//! One [`drive_run`] task per client run. The driver partially evaluates the
//! call graph (only calls on a causal path to a requested placeholder, plus
//! side-effecting calls, are ever dispatched) and streams placeholders to
//! the owning session as they resolve, in completion order.
//!
//! Failure policy: a worker death is retried once for the affected call; the
//! pipeline's own errors fail the run immediately. In both terminal cases
//! placeholders that already resolved stay delivered.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rill_pool::{CallRequest, PoolError, WorkerPool};
use rill_types::{codec, ArgExpr, CallGraph, FromServer, NodeId, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

// ── Run state machine ────────────────────────────────────────────────────────

/// Created → Running → Completed | Cancelled | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ── Partial evaluation ───────────────────────────────────────────────────────

/// Nodes that must execute to produce the requested placeholders: the
/// placeholder nodes themselves, their transitive dependencies, and every
/// impure node. Everything else is never dispatched.
pub fn required_nodes(graph: &CallGraph, requested: &BTreeSet<String>) -> Result<BTreeSet<NodeId>> {
    let mut stack = Vec::new();
    for name in requested {
        match graph.placeholder_node(name) {
            Some(node) => stack.push(node.id),
            None => return Err(EngineError::UnknownPlaceholder(name.clone())),
        }
    }
    for node in graph.nodes() {
        if node.impure {
            stack.push(node.id);
        }
    }

    let mut needed = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if needed.insert(id) {
            let node = graph.node(id).expect("validated graph");
            stack.extend(node.dependencies());
        }
    }
    Ok(needed)
}

// ── Driver ───────────────────────────────────────────────────────────────────

pub(crate) struct RunContext {
    pub run_id: String,
    pub graph: Arc<CallGraph>,
    pub requested: BTreeSet<String>,
    pub needed: BTreeSet<NodeId>,
    pub pool: WorkerPool,
    pub outgoing: mpsc::Sender<FromServer>,
    pub cancel: watch::Receiver<bool>,
}

type InFlight = FuturesUnordered<BoxFuture<'static, (NodeId, u32, rill_pool::error::Result<Arc<Value>>)>>;

/// Execute one run to a terminal state. Terminal notifications are sent on
/// the session's outgoing channel; send failures are ignored because a
/// closed channel means the client is already gone.
pub(crate) async fn drive_run(mut ctx: RunContext) -> RunState {
    info!(run_id = %ctx.run_id, calls = ctx.needed.len(), "pipeline run started");

    let mut pending_deps: HashMap<NodeId, usize> = HashMap::new();
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for id in &ctx.needed {
        let node = ctx.graph.node(*id).expect("validated graph");
        let deps: Vec<NodeId> = node.dependencies().collect();
        pending_deps.insert(*id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(*id);
        }
    }

    let mut values: HashMap<NodeId, Arc<Value>> = HashMap::new();
    let mut in_flight: InFlight = FuturesUnordered::new();
    let mut completed = 0usize;

    for (id, pending) in &pending_deps {
        if *pending == 0 {
            dispatch(&ctx, *id, 0, &values, &mut in_flight);
        }
    }

    let state = loop {
        if ctx.needed.is_empty() {
            let _ = ctx
                .outgoing
                .send(FromServer::RunCompleted { run_id: ctx.run_id.clone() })
                .await;
            break RunState::Completed;
        }

        tokio::select! {
            // Cancelled either explicitly or by the owning session going away.
            _ = ctx.cancel.changed() => {
                info!(run_id = %ctx.run_id, "run cancelled");
                let _ = ctx
                    .outgoing
                    .send(FromServer::RunCancelled { run_id: ctx.run_id.clone() })
                    .await;
                break RunState::Cancelled;
            }

            next = in_flight.next() => {
                let Some((node_id, attempt, result)) = next else {
                    // No calls left but the run is incomplete: bookkeeping bug.
                    warn!(run_id = %ctx.run_id, "run stalled with no in-flight calls");
                    break RunState::Failed;
                };

                match result {
                    Ok(value) => {
                        emit_placeholder(&ctx, node_id, &value).await;
                        values.insert(node_id, value);
                        completed += 1;

                        if let Some(next_ready) = dependents.get(&node_id) {
                            let ready: Vec<NodeId> = next_ready
                                .iter()
                                .filter(|dependent| {
                                    let pending = pending_deps
                                        .get_mut(dependent)
                                        .expect("dependent is a needed node");
                                    *pending -= 1;
                                    *pending == 0
                                })
                                .copied()
                                .collect();
                            for id in ready {
                                dispatch(&ctx, id, 0, &values, &mut in_flight);
                            }
                        }

                        if completed == ctx.needed.len() {
                            info!(run_id = %ctx.run_id, "run completed");
                            let _ = ctx
                                .outgoing
                                .send(FromServer::RunCompleted { run_id: ctx.run_id.clone() })
                                .await;
                            break RunState::Completed;
                        }
                    }

                    Err(PoolError::WorkerFailure { worker_id }) if attempt == 0 => {
                        warn!(
                            run_id = %ctx.run_id,
                            node = %node_id,
                            worker_id,
                            "worker failure, retrying call once"
                        );
                        dispatch(&ctx, node_id, 1, &values, &mut in_flight);
                    }

                    Err(PoolError::Cancelled) | Err(PoolError::Draining) => {
                        let _ = ctx
                            .outgoing
                            .send(FromServer::RunCancelled { run_id: ctx.run_id.clone() })
                            .await;
                        break RunState::Cancelled;
                    }

                    Err(err) => {
                        let (error_kind, message) = classify(&err);
                        warn!(run_id = %ctx.run_id, node = %node_id, %message, "run failed");
                        let _ = ctx
                            .outgoing
                            .send(FromServer::RunFailed {
                                run_id: ctx.run_id.clone(),
                                error_kind: error_kind.to_string(),
                                message,
                            })
                            .await;
                        break RunState::Failed;
                    }
                }
            }
        }
    };

    // Cancellation is cooperative: calls already on a worker run to
    // completion so the worker returns to the idle set.
    if !in_flight.is_empty() {
        tokio::spawn(async move { while in_flight.next().await.is_some() {} });
    }

    state
}

/// Resolve the node's arguments against already-computed values and push the
/// pool call onto the in-flight set.
fn dispatch(
    ctx: &RunContext,
    node_id: NodeId,
    attempt: u32,
    values: &HashMap<NodeId, Arc<Value>>,
    in_flight: &mut InFlight,
) {
    let node = ctx.graph.node(node_id).expect("validated graph");
    let resolve = |expr: &ArgExpr| -> Value {
        match expr {
            ArgExpr::Literal(value) => value.clone(),
            ArgExpr::Node(dep) => (*values[dep]).clone(),
        }
    };
    let request = CallRequest {
        callable: node.callable.clone(),
        positional: node.positional.iter().map(|expr| resolve(expr)).collect(),
        keyword: node
            .keyword
            .iter()
            .map(|(name, expr)| (name.clone(), resolve(expr)))
            .collect(),
        memoize: !node.impure,
    };

    debug!(run_id = %ctx.run_id, node = %node_id, callable = %request.callable, attempt, "dispatching call");
    let pool = ctx.pool.clone();
    in_flight.push(Box::pin(async move {
        (node_id, attempt, pool.execute(request).await)
    }));
}

/// Stream a resolved placeholder if the client asked for it. Codec failure
/// degrades to a per-placeholder delivery failure.
async fn emit_placeholder(ctx: &RunContext, node_id: NodeId, value: &Value) {
    let node = ctx.graph.node(node_id).expect("validated graph");
    let Some(name) = &node.placeholder else { return };
    if !ctx.requested.contains(name) {
        return;
    }

    match codec::encode_value(value) {
        Ok(wire) => {
            info!(run_id = %ctx.run_id, placeholder = %name, "placeholder resolved");
            let _ = ctx
                .outgoing
                .send(FromServer::PlaceholderValue {
                    run_id: ctx.run_id.clone(),
                    name: name.clone(),
                    value: wire,
                })
                .await;
        }
        Err(err) => {
            warn!(run_id = %ctx.run_id, placeholder = %name, %err, "placeholder not deliverable");
            let _ = ctx
                .outgoing
                .send(FromServer::PlaceholderFailed {
                    run_id: ctx.run_id.clone(),
                    name: name.clone(),
                    message: err.to_string(),
                })
                .await;
        }
    }
}

fn classify(err: &PoolError) -> (&'static str, String) {
    match err {
        PoolError::Call(call_err) => ("pipeline_error", call_err.to_string()),
        PoolError::WorkerFailure { .. } => ("worker_failure", err.to_string()),
        PoolError::Draining | PoolError::Cancelled => ("cancelled", err.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
