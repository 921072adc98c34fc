//! # Structured Error Handling
//!
//! Crate-level error taxonomy for the process pool. Task-level failures
//! (unknown task, execution error) are recovered inside the worker runtime and
//! surface to submitters as [`PoolError::TaskFailed`]; process-level failures
//! affect only the job in flight on the crashed slot.

use thiserror::Error;

/// Errors surfaced by the dispatcher and its collaborators.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The worker executed the job and reported a failure. Covers unknown
    /// task names, invalid payloads, and task panics caught at the runtime
    /// boundary; the worker process itself survives.
    #[error("task failed: {message}")]
    TaskFailed { message: String },

    /// The worker process exited while it held an in-flight job.
    #[error("worker crashed while executing job {job_id} (slot {slot})")]
    WorkerCrashed { slot: usize, job_id: u64 },

    /// The backlog is at capacity; the job was rejected at submission.
    #[error("backlog full: {capacity} jobs already queued")]
    BacklogFull { capacity: usize },

    /// Submit arrived after shutdown began, or the job was still queued when
    /// draining started.
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// The job was still in flight when the shutdown drain window elapsed.
    #[error("job {job_id} abandoned: shutdown drain window elapsed")]
    ShutdownTimeout { job_id: u64 },

    /// A worker process could not be spawned, or a slot exceeded its
    /// consecutive crash-on-start limit.
    #[error("failed to start worker for slot {slot}: {message}")]
    SpawnFailed { slot: usize, message: String },

    /// The channel to a worker process is gone.
    #[error("worker channel error: {message}")]
    Channel { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = PoolError::WorkerCrashed { slot: 2, job_id: 17 };
        assert_eq!(
            err.to_string(),
            "worker crashed while executing job 17 (slot 2)"
        );

        let err = PoolError::TaskFailed {
            message: "unknown task: doesNotExist".to_string(),
        };
        assert!(err.to_string().contains("unknown task: doesNotExist"));

        let err = PoolError::BacklogFull { capacity: 8 };
        assert_eq!(err.to_string(), "backlog full: 8 jobs already queued");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: PoolError = io.into();
        assert!(matches!(err, PoolError::Io(_)));
    }
}
