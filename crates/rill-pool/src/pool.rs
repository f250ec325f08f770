//! Bounded pool of long-lived workers.
//!
//! Capacity is a semaphore: one permit per concurrently executing call.
//! Workers are spawned lazily up to `max_workers` and returned to an idle
//! set after each call; [`WorkerPool::prewarm`] warms workers ahead of the
//! first run, trading resident memory for cold-start latency.
//!
//! Fault containment: a worker that dies mid-call is retired and replaced,
//! and only the in-flight call observes [`PoolError::WorkerFailure`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rill_memo::MemoCache;
use rill_types::{PoolConfig, Value};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{PoolError, Result};
use crate::registry::CallableRegistry;
use crate::worker::{self, CallJob, CallSpec, WorkerHandle, WorkerId};

/// One call to dispatch, with dependencies already resolved to values.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub callable: String,
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
    /// `false` for impure calls: execute without consulting the cache.
    pub memoize: bool,
}

// ── Pool ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

struct Shared {
    config: PoolConfig,
    cache: Arc<MemoCache>,
    registry: Arc<CallableRegistry>,
    capacity: Semaphore,
    idle: Mutex<Vec<WorkerHandle>>,
    /// Join handles of every live worker, for fault injection and shutdown.
    tasks: Mutex<HashMap<WorkerId, JoinHandle<()>>>,
    next_worker_id: AtomicU32,
    draining: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, cache: Arc<MemoCache>, registry: Arc<CallableRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: Semaphore::new(config.max_workers),
                config,
                cache,
                registry,
                idle: Mutex::new(Vec::new()),
                tasks: Mutex::new(HashMap::new()),
                next_worker_id: AtomicU32::new(0),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Warm `count` workers ahead of the first call (bounded by
    /// `max_workers`). Idle workers hold their resources deliberately: the
    /// memory buys us out of repeated cold starts.
    pub async fn prewarm(&self, count: usize) {
        let count = count.min(self.shared.config.max_workers);
        for _ in 0..count {
            let handle = self.spawn_worker().await;
            self.shared.idle.lock().expect("idle set poisoned").push(handle);
        }
        info!(workers = count, "pre-warmed worker pool");
    }

    /// Execute one call on an idle worker, blocking until capacity is
    /// available. The returned value is shared with the memoization cache
    /// where applicable.
    pub async fn execute(&self, request: CallRequest) -> Result<Arc<Value>> {
        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(PoolError::Draining);
        }

        let _permit = self
            .shared
            .capacity
            .acquire()
            .await
            .map_err(|_| PoolError::Draining)?;
        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(PoolError::Draining);
        }

        let existing = self.shared.idle.lock().expect("idle set poisoned").pop();
        let worker = match existing {
            Some(worker) => worker,
            None => self.spawn_worker().await,
        };
        let worker_id = worker.id;

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = CallJob {
            spec: CallSpec {
                callable: request.callable,
                positional: request.positional,
                keyword: request.keyword,
                memoize: request.memoize,
            },
            reply: reply_tx,
        };

        if worker.jobs.send(job).await.is_err() {
            // Worker died before accepting the job.
            return self.handle_worker_death(worker_id).await;
        }

        match reply_rx.await {
            Ok(Ok(value)) => {
                self.return_to_idle(worker);
                Ok(value)
            }
            Ok(Err(call_err)) => {
                // The pipeline's own failure; the worker itself is healthy.
                self.return_to_idle(worker);
                Err(call_err.into())
            }
            Err(_) => self.handle_worker_death(worker_id).await,
        }
    }

    /// Stop accepting new calls, wait for in-flight calls up to the grace
    /// period, then terminate every worker. Idempotent.
    pub async fn shutdown(&self) {
        if self.shared.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("draining worker pool");

        let all = self.shared.config.max_workers as u32;
        match timeout(self.shared.config.drain_grace, self.shared.capacity.acquire_many(all)).await
        {
            Ok(Ok(permits)) => permits.forget(),
            _ => warn!(
                grace = ?self.shared.config.drain_grace,
                "grace period expired, force-cancelling in-flight calls"
            ),
        }

        for (_, task) in self.shared.tasks.lock().expect("task map poisoned").drain() {
            task.abort();
        }
        self.shared.idle.lock().expect("idle set poisoned").clear();
        info!("worker pool stopped");
    }

    /// Abort a live worker. Fault-injection hook; a production worker dies
    /// on its own just fine.
    pub fn kill_worker(&self, id: WorkerId) -> bool {
        match self.shared.tasks.lock().expect("task map poisoned").get(&id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Ids of workers currently executing a call.
    pub fn busy_worker_ids(&self) -> Vec<WorkerId> {
        let idle: Vec<WorkerId> = self
            .shared
            .idle
            .lock()
            .expect("idle set poisoned")
            .iter()
            .map(|w| w.id)
            .collect();
        self.shared
            .tasks
            .lock()
            .expect("task map poisoned")
            .keys()
            .filter(|id| !idle.contains(id))
            .copied()
            .collect()
    }

    pub fn idle_workers(&self) -> usize {
        self.shared.idle.lock().expect("idle set poisoned").len()
    }

    pub fn live_workers(&self) -> usize {
        self.shared.tasks.lock().expect("task map poisoned").len()
    }

    pub fn cache(&self) -> &Arc<MemoCache> {
        &self.shared.cache
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn spawn_worker(&self) -> WorkerHandle {
        let id = self.shared.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let (handle, task) = worker::spawn_worker(
            id,
            Arc::clone(&self.shared.cache),
            Arc::clone(&self.shared.registry),
        )
        .await;
        self.shared
            .tasks
            .lock()
            .expect("task map poisoned")
            .insert(id, task);
        handle
    }

    fn return_to_idle(&self, worker: WorkerHandle) {
        if !self.shared.draining.load(Ordering::SeqCst) {
            self.shared.idle.lock().expect("idle set poisoned").push(worker);
        }
    }

    /// Retire a dead worker and spawn its replacement. Only the in-flight
    /// call is affected; during drain the death is reported as cancellation.
    async fn handle_worker_death(&self, worker_id: WorkerId) -> Result<Arc<Value>> {
        if let Some(task) = self
            .shared
            .tasks
            .lock()
            .expect("task map poisoned")
            .remove(&worker_id)
        {
            task.abort();
        }

        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(PoolError::Cancelled);
        }

        warn!(worker_id, "worker died mid-call, spawning replacement");
        let replacement = self.spawn_worker().await;
        self.shared
            .idle
            .lock()
            .expect("idle set poisoned")
            .push(replacement);
        Err(PoolError::WorkerFailure { worker_id })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::registry::CallArgs;
    use rill_types::CacheConfig;
    use std::time::Duration;

    fn test_pool(max_workers: usize, grace: Duration) -> WorkerPool {
        let mut registry = CallableRegistry::new();
        registry.register("double", |args: &CallArgs| match &args.positional[0] {
            Value::Int(i) => Ok(Value::Int(i * 2)),
            _ => Err(CallError::Failed {
                callable: "double".into(),
                message: "expected int".into(),
            }),
        });
        registry.register("slow", |args: &CallArgs| {
            let millis = match &args.positional[0] {
                Value::Int(i) => *i as u64,
                _ => 0,
            };
            std::thread::sleep(Duration::from_millis(millis));
            Ok(Value::Int(millis as i64))
        });
        registry.register("fails", |_: &CallArgs| {
            Err(CallError::Failed {
                callable: "fails".into(),
                message: "bad input".into(),
            })
        });

        let config = PoolConfig {
            max_workers,
            drain_grace: grace,
        };
        WorkerPool::new(
            config,
            Arc::new(MemoCache::new(CacheConfig::default())),
            Arc::new(registry),
        )
    }

    fn call(callable: &str, arg: i64) -> CallRequest {
        CallRequest {
            callable: callable.into(),
            positional: vec![Value::Int(arg)],
            keyword: vec![],
            memoize: true,
        }
    }

    #[tokio::test]
    async fn executes_and_hits_cache_on_repeat() {
        let pool = test_pool(2, Duration::from_secs(1));
        pool.prewarm(1).await;

        let first = pool.execute(call("double", 8)).await.unwrap();
        assert_eq!(*first, Value::Int(16));
        let second = pool.execute(call("double", 8)).await.unwrap();
        assert_eq!(*second, Value::Int(16));

        let stats = pool.cache().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn call_error_propagates_and_worker_survives() {
        let pool = test_pool(1, Duration::from_secs(1));
        pool.prewarm(1).await;

        let err = pool.execute(call("fails", 0)).await.unwrap_err();
        assert!(matches!(err, PoolError::Call(_)));

        // Same worker still serves the next call.
        assert_eq!(pool.live_workers(), 1);
        let ok = pool.execute(call("double", 2)).await.unwrap();
        assert_eq!(*ok, Value::Int(4));
    }

    #[tokio::test]
    async fn pool_never_exceeds_max_workers() {
        let pool = test_pool(2, Duration::from_secs(1));

        let mut handles = Vec::new();
        for i in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.execute(call("slow", 50 + i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(pool.live_workers() <= 2);
    }

    #[tokio::test]
    async fn killed_worker_is_replaced_and_idle_count_recovers() {
        let pool = test_pool(2, Duration::from_secs(1));
        pool.prewarm(1).await;
        let idle_before = pool.idle_workers();
        assert_eq!(idle_before, 1);

        let exec = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(call("slow", 500)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let busy = pool.busy_worker_ids();
        assert_eq!(busy.len(), 1);
        assert!(pool.kill_worker(busy[0]));

        let result = exec.await.unwrap();
        assert!(matches!(result, Err(PoolError::WorkerFailure { .. })));

        // Replacement restores the pre-failure idle count.
        assert_eq!(pool.idle_workers(), idle_before);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_calls_and_is_idempotent() {
        let pool = test_pool(2, Duration::from_millis(100));
        pool.prewarm(2).await;

        pool.shutdown().await;
        let err = pool.execute(call("double", 1)).await.unwrap_err();
        assert!(matches!(err, PoolError::Draining));

        // Second shutdown is a no-op.
        pool.shutdown().await;
        assert_eq!(pool.live_workers(), 0);
    }

    #[tokio::test]
    async fn shutdown_force_cancels_after_grace() {
        let pool = test_pool(1, Duration::from_millis(100));
        pool.prewarm(1).await;

        let exec = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(call("slow", 5_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.shutdown().await;
        let result = exec.await.unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }
}
