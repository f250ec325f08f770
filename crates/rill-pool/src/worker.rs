//! Worker task: the unit that actually runs pipeline calls.
//!
//! Each worker owns a job channel and lives until the pool drops the sender
//! (or aborts the task). Execution order per job: fingerprint → cache probe
//! → compute on the blocking pool → best-effort store. Hash and codec
//! failures degrade the single call to uncached execution; they never fail
//! the job itself.

use std::sync::Arc;
use std::time::Instant;

use rill_memo::{fingerprint, CallFingerprint, FingerprintOutcome, MemoCache};
use rill_types::codec;
use rill_types::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::CallError;
use crate::registry::{CallArgs, CallableRegistry};

pub type WorkerId = u32;

/// A fully resolved call, ready for dispatch.
#[derive(Debug, Clone)]
pub(crate) struct CallSpec {
    pub callable: String,
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
    /// Impure calls bypass the cache entirely.
    pub memoize: bool,
}

pub(crate) struct CallJob {
    pub spec: CallSpec,
    pub reply: oneshot::Sender<Result<Arc<Value>, CallError>>,
}

pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    pub jobs: mpsc::Sender<CallJob>,
}

/// Spawn a worker and wait until it has warmed up.
pub(crate) async fn spawn_worker(
    id: WorkerId,
    cache: Arc<MemoCache>,
    registry: Arc<CallableRegistry>,
) -> (WorkerHandle, tokio::task::JoinHandle<()>) {
    let (jobs_tx, jobs_rx) = mpsc::channel(1);
    let (ready_tx, ready_rx) = oneshot::channel();
    let task = tokio::spawn(worker_loop(id, jobs_rx, cache, registry, ready_tx));
    // Warm-up is intentionally paid here, not on the first pipeline call.
    let _ = ready_rx.await;
    (WorkerHandle { id, jobs: jobs_tx }, task)
}

async fn worker_loop(
    id: WorkerId,
    mut jobs: mpsc::Receiver<CallJob>,
    cache: Arc<MemoCache>,
    registry: Arc<CallableRegistry>,
    ready: oneshot::Sender<()>,
) {
    registry.warmup();
    debug!(worker_id = id, "worker warmed and ready");
    let _ = ready.send(());

    while let Some(job) = jobs.recv().await {
        let result = execute_job(&cache, &registry, job.spec).await;
        // Receiver may be gone if the coordinating call was dropped.
        let _ = job.reply.send(result);
    }
    debug!(worker_id = id, "worker stopped");
}

async fn execute_job(
    cache: &MemoCache,
    registry: &CallableRegistry,
    spec: CallSpec,
) -> Result<Arc<Value>, CallError> {
    let callable = registry.resolve(&spec.callable)?;

    let key: Option<CallFingerprint> = if spec.memoize {
        match fingerprint(&spec.callable, &spec.positional, &spec.keyword) {
            FingerprintOutcome::Hashed(fp) => Some(fp),
            FingerprintOutcome::Unhashable => None,
        }
    } else {
        None
    };

    if let Some(fp) = &key {
        if let Some(hit) = cache.lookup(fp) {
            debug!(callable = %spec.callable, %fp, "cache hit");
            return Ok(hit);
        }
    }

    // The callable is synchronous and may run for a long time; keep it off
    // the async worker threads.
    let args = CallArgs {
        positional: spec.positional,
        keyword: spec.keyword,
    };
    let name = spec.callable.clone();
    let started = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || callable(&args)).await;
    let computation = started.elapsed();

    let value = match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => return Err(err),
        Err(join_err) if join_err.is_panic() => {
            return Err(CallError::Panicked {
                callable: name,
                message: panic_message(join_err),
            });
        }
        Err(_) => {
            return Err(CallError::Failed {
                callable: name,
                message: "computation task cancelled".into(),
            });
        }
    };

    if let Some(fp) = key {
        // Best-effort store: values that cannot cross a process boundary
        // degrade that single call to uncached execution.
        match codec::check_encodable(&value) {
            Ok(()) => return Ok(cache.store(fp, &spec.callable, value, computation)),
            Err(err) => {
                warn!(callable = %spec.callable, %err, "result not cacheable, returning uncached");
            }
        }
    }

    Ok(Arc::new(value))
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rill_types::CacheConfig;

    fn test_registry() -> Arc<CallableRegistry> {
        let mut registry = CallableRegistry::new();
        registry.register("double", |args: &CallArgs| match &args.positional[0] {
            Value::Int(i) => Ok(Value::Int(i * 2)),
            other => Err(CallError::Failed {
                callable: "double".into(),
                message: format!("expected int, got {}", other.kind()),
            }),
        });
        registry.register("panics", |_: &CallArgs| panic!("boom"));
        registry.register("opaque_result", |_: &CallArgs| {
            Ok(Value::Opaque {
                token: 1,
                kind: "connection".into(),
            })
        });
        Arc::new(registry)
    }

    fn spec(callable: &str, arg: i64, memoize: bool) -> CallSpec {
        CallSpec {
            callable: callable.into(),
            positional: vec![Value::Int(arg)],
            keyword: vec![],
            memoize,
        }
    }

    #[tokio::test]
    async fn computes_and_memoizes() {
        let cache = Arc::new(MemoCache::new(CacheConfig::default()));
        let registry = test_registry();

        let first = execute_job(&cache, &registry, spec("double", 21, true))
            .await
            .unwrap();
        assert_eq!(*first, Value::Int(42));

        let second = execute_job(&cache, &registry, spec("double", 21, true))
            .await
            .unwrap();
        assert_eq!(*second, Value::Int(42));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn impure_calls_never_touch_the_cache() {
        let cache = Arc::new(MemoCache::new(CacheConfig::default()));
        let registry = test_registry();

        execute_job(&cache, &registry, spec("double", 1, false))
            .await
            .unwrap();
        execute_job(&cache, &registry, spec("double", 1, false))
            .await
            .unwrap();

        let stats = cache.stats();
        assert_eq!(stats.lookups, 0);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn unhashable_argument_degrades_to_uncached() {
        let cache = Arc::new(MemoCache::new(CacheConfig::default()));
        let mut registry = CallableRegistry::new();
        registry.register("first_kind", |args: &CallArgs| {
            Ok(Value::Text(args.positional[0].kind().into()))
        });
        let registry = Arc::new(registry);

        let spec = CallSpec {
            callable: "first_kind".into(),
            positional: vec![Value::Opaque {
                token: 9,
                kind: "connection".into(),
            }],
            keyword: vec![],
            memoize: true,
        };
        let value = execute_job(&cache, &registry, spec).await.unwrap();
        assert_eq!(*value, Value::Text("opaque".into()));

        // The call still produced a correct result and counters are untouched.
        let stats = cache.stats();
        assert_eq!(stats.lookups, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn unencodable_result_is_returned_but_not_cached() {
        let cache = Arc::new(MemoCache::new(CacheConfig::default()));
        let registry = test_registry();

        let value = execute_job(&cache, &registry, spec("opaque_result", 0, true))
            .await
            .unwrap();
        assert_eq!(value.kind(), "opaque");
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn panic_becomes_a_call_error() {
        let cache = Arc::new(MemoCache::new(CacheConfig::default()));
        let registry = test_registry();

        let err = execute_job(&cache, &registry, spec("panics", 0, true))
            .await
            .unwrap_err();
        match err {
            CallError::Panicked { message, .. } => assert!(message.contains("boom")),
            other => panic!("expected panic error, got {other}"),
        }
    }
}
