//! # Process Pool Dispatcher
//!
//! Manages a fixed-size pool of worker processes executing CPU-bound jobs.
//!
//! ## Key Components
//!
//! - [`Dispatcher`] - cloneable handle: submit jobs, read stats, shut down
//! - [`router`] - single-consumer routing loop serializing all bookkeeping
//! - [`slot`] - per-worker process handle, replaceable in place on crash
//! - [`shutdown`] - drain/terminate state machine
//!
//! All mutation of the backlog, the in-flight table, and slot phases happens
//! inside the routing loop, one event at a time. Submitting never blocks the
//! caller: it enqueues a command and returns a future resolved when the
//! result message for that correlation id is routed back.

pub mod router;
pub mod shutdown;
pub mod slot;

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::protocol::WorkerMessage;

use self::router::Router;

/// Successful result of one submitted job.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// Task-specific result value produced by the worker.
    pub result: Value,
    /// Wall-clock execution time inside the worker, in milliseconds.
    pub duration_ms: u64,
}

/// Advisory point-in-time snapshot of pool occupancy.
///
/// Readers may observe slightly stale counts under concurrent load; the
/// snapshot is refreshed by the routing loop after each event and is never
/// used for admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub available_workers: usize,
    pub queued_jobs: usize,
    pub inflight_jobs: usize,
}

impl PoolStats {
    fn starting(pool_size: usize) -> Self {
        Self {
            total_workers: pool_size,
            busy_workers: 0,
            available_workers: 0,
            queued_jobs: 0,
            inflight_jobs: 0,
        }
    }
}

/// Operational view of one worker slot, for introspection and tests.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// Stable logical index, preserved across process replacement.
    pub identity: usize,
    /// OS process id of the current incarnation, if alive.
    pub pid: Option<u32>,
    pub busy: bool,
}

/// Snapshot shared between the routing loop and [`Dispatcher`] handles.
#[derive(Debug, Clone)]
pub(crate) struct PoolSnapshot {
    pub stats: PoolStats,
    pub workers: Vec<WorkerInfo>,
}

/// External requests routed into the loop.
pub(crate) enum PoolCommand {
    Submit {
        task: String,
        payload: Value,
        reply: oneshot::Sender<Result<TaskOutput>>,
    },
    Shutdown {
        drain_timeout: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Everything the routing loop reacts to: commands from handles, messages and
/// exits from worker processes, and its own timers.
pub(crate) enum PoolEvent {
    Command(PoolCommand),
    WorkerMessage {
        slot: usize,
        generation: u64,
        message: WorkerMessage,
    },
    WorkerExited {
        slot: usize,
        generation: u64,
        status: Option<ExitStatus>,
    },
    RespawnDue {
        slot: usize,
        generation: u64,
    },
    DrainElapsed,
    TerminateElapsed,
}

/// Handle to a running process pool.
///
/// Cheap to clone; all clones talk to the same routing loop. There is no
/// global singleton: construct one with [`Dispatcher::new`] and pass it to
/// whatever front end needs it.
#[derive(Clone)]
pub struct Dispatcher {
    id: Uuid,
    events: mpsc::UnboundedSender<PoolEvent>,
    snapshot: Arc<RwLock<PoolSnapshot>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("id", &self.id).finish()
    }
}

impl Dispatcher {
    /// Create the pool and spawn its N workers.
    ///
    /// Must be called from within a Tokio runtime. Fails fast if the worker
    /// program cannot be executed at all; crash-on-start after a successful
    /// exec is retried by the routing loop instead.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        let worker_program = config.worker_program()?;

        info!(
            dispatcher_id = %id,
            pool_size = config.pool_size,
            worker = %worker_program.display(),
            "🏊 POOL: creating dispatcher"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(PoolSnapshot {
            stats: PoolStats::starting(config.pool_size),
            workers: Vec::new(),
        }));

        let router = Router::new(
            id,
            config,
            worker_program,
            events_tx.clone(),
            snapshot.clone(),
        )?;
        tokio::spawn(router.run(events_rx));

        Ok(Self {
            id,
            events: events_tx,
            snapshot,
        })
    }

    /// Submit a job for execution.
    ///
    /// Never blocks waiting for a free slot: the job is dispatched immediately
    /// if a worker is idle, otherwise appended to the FIFO backlog. The
    /// returned future resolves when the worker's terminal result is routed
    /// back, or rejects on task failure, worker crash, a full backlog, or
    /// shutdown.
    pub async fn submit(&self, task: impl Into<String>, payload: Value) -> Result<TaskOutput> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(PoolEvent::Command(PoolCommand::Submit {
                task: task.into(),
                payload,
                reply: reply_tx,
            }))
            .map_err(|_| PoolError::ShuttingDown)?;

        reply_rx.await.map_err(|_| PoolError::ShuttingDown)?
    }

    /// Advisory snapshot of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        self.snapshot.read().stats.clone()
    }

    /// Per-slot operational view (identity, pid, busy flag).
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.snapshot.read().workers.clone()
    }

    /// Unique id of this dispatcher instance, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Gracefully shut the pool down using the configured drain window.
    ///
    /// Idempotent: concurrent or repeated calls attach to the in-progress
    /// sequence and observe the same outcome. In-flight jobs still unsettled
    /// when the drain window elapses are rejected with
    /// [`PoolError::ShutdownTimeout`]; queued jobs are rejected immediately
    /// with [`PoolError::ShuttingDown`].
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_inner(None).await
    }

    /// [`shutdown`](Self::shutdown) with an explicit drain window.
    pub async fn shutdown_with_timeout(&self, drain_timeout: Duration) -> Result<()> {
        self.shutdown_inner(Some(drain_timeout)).await
    }

    async fn shutdown_inner(&self, drain_timeout: Option<Duration>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = PoolEvent::Command(PoolCommand::Shutdown {
            drain_timeout,
            reply: reply_tx,
        });
        if self.events.send(command).is_err() {
            // Routing loop already terminated; same outcome as the first call.
            return Ok(());
        }

        match reply_rx.await {
            Ok(result) => result,
            // The routing loop exits right after resolving shutdown replies;
            // a dropped reply here means shutdown already completed.
            Err(_) => Ok(()),
        }
    }
}
