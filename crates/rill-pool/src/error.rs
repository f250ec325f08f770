// Pool error taxonomy. Containment scope: one call, never the whole pool.

/// Failure raised by the pipeline's own callable. Never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("callable '{callable}' failed: {message}")]
    Failed { callable: String, message: String },

    #[error("callable '{0}' is not registered")]
    UnknownCallable(String),

    #[error("callable '{callable}' panicked: {message}")]
    Panicked { callable: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pipeline's own logic failed. Surfaced to the run, not retried.
    #[error(transparent)]
    Call(#[from] CallError),

    /// A worker died mid-call. The affected call may be retried once; the
    /// pool has already spawned a replacement.
    #[error("worker {worker_id} died mid-call")]
    WorkerFailure { worker_id: u32 },

    /// The pool no longer accepts new calls.
    #[error("worker pool is draining")]
    Draining,

    /// The call was force-cancelled by pool shutdown after the grace period.
    #[error("call cancelled by pool shutdown")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PoolError>;
