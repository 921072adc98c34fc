//! # Routing Loop
//!
//! Single logical thread of control for all pool bookkeeping. Every mutation
//! of the backlog, the in-flight table, and slot phases happens here, one
//! event at a time, which is what upholds the pool invariants: at most one
//! job per slot, in-flight ids mapping 1:1 to dispatched jobs, and backlog /
//! in-flight disjointness.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::protocol::{JobOutcome, JobRequest, WorkerMessage};

use super::shutdown::LifecyclePhase;
use super::slot::{SlotPhase, WorkerSlot};
use super::{PoolCommand, PoolEvent, PoolSnapshot, PoolStats, TaskOutput, WorkerInfo};

/// A job waiting in the backlog. Immutable once created; only its position
/// changes as the queue drains.
pub(super) struct PendingJob {
    pub id: u64,
    pub task: String,
    pub payload: Value,
    pub submitted_at: DateTime<Utc>,
    pub reply: oneshot::Sender<Result<TaskOutput>>,
}

/// Bookkeeping for a job currently executing on a worker.
pub(super) struct InflightJob {
    pub slot: usize,
    pub task: String,
    pub submitted_at: DateTime<Utc>,
    pub reply: oneshot::Sender<Result<TaskOutput>>,
}

pub(crate) struct Router {
    pub(super) id: Uuid,
    pub(super) config: PoolConfig,
    pub(super) worker_program: PathBuf,
    pub(super) slots: Vec<WorkerSlot>,
    pub(super) backlog: VecDeque<PendingJob>,
    pub(super) inflight: HashMap<u64, InflightJob>,
    /// Monotonic correlation id source; never reused within this process.
    pub(super) next_id: u64,
    pub(super) phase: LifecyclePhase,
    pub(super) shutdown_replies: Vec<oneshot::Sender<Result<()>>>,
    pub(super) events: UnboundedSender<PoolEvent>,
    pub(super) snapshot: Arc<RwLock<PoolSnapshot>>,
}

impl Router {
    /// Build the router and spawn the initial N workers.
    ///
    /// A spawn error here (worker binary missing or not executable) is fatal
    /// for construction; crash-on-start after a successful exec is retried by
    /// the running loop instead.
    pub(super) fn new(
        id: Uuid,
        config: PoolConfig,
        worker_program: PathBuf,
        events: UnboundedSender<PoolEvent>,
        snapshot: Arc<RwLock<PoolSnapshot>>,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(config.pool_size);
        for identity in 0..config.pool_size {
            let mut slot = WorkerSlot::new(identity);
            slot.spawn(&worker_program, &config.worker_args, &events)?;
            slots.push(slot);
        }

        info!(
            dispatcher_id = %id,
            pool_size = slots.len(),
            "🚀 POOL: spawned initial workers"
        );

        Ok(Self {
            id,
            config,
            worker_program,
            slots,
            backlog: VecDeque::new(),
            inflight: HashMap::new(),
            next_id: 1,
            phase: LifecyclePhase::Running,
            shutdown_replies: Vec::new(),
            events,
            snapshot,
        })
    }

    /// Consume events until the pool reaches its terminated state.
    pub(super) async fn run(mut self, mut events: UnboundedReceiver<PoolEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PoolEvent::Command(PoolCommand::Submit {
                    task,
                    payload,
                    reply,
                }) => self.handle_submit(task, payload, reply).await,
                PoolEvent::Command(PoolCommand::Shutdown {
                    drain_timeout,
                    reply,
                }) => self.handle_shutdown(drain_timeout, reply),
                PoolEvent::WorkerMessage {
                    slot,
                    generation,
                    message,
                } => self.handle_worker_message(slot, generation, message).await,
                PoolEvent::WorkerExited {
                    slot,
                    generation,
                    status,
                } => self.handle_worker_exited(slot, generation, status),
                PoolEvent::RespawnDue { slot, generation } => {
                    self.handle_respawn_due(slot, generation)
                }
                PoolEvent::DrainElapsed => self.handle_drain_elapsed(),
                PoolEvent::TerminateElapsed => self.handle_terminate_elapsed(),
            }

            self.refresh_snapshot();

            if self.phase == LifecyclePhase::Terminated {
                break;
            }
        }

        debug!(dispatcher_id = %self.id, "POOL: routing loop ended");
    }

    async fn handle_submit(
        &mut self,
        task: String,
        payload: Value,
        reply: oneshot::Sender<Result<TaskOutput>>,
    ) {
        if self.phase != LifecyclePhase::Running {
            let _ = reply.send(Err(PoolError::ShuttingDown));
            return;
        }

        let id = self.next_id;
        self.next_id += 1;

        let job = PendingJob {
            id,
            task,
            payload,
            submitted_at: Utc::now(),
            reply,
        };

        if let Some(idx) = self.slots.iter().position(WorkerSlot::is_idle) {
            self.dispatch_to(idx, job).await;
        } else if self.backlog.len() >= self.config.backlog_capacity {
            let _ = job.reply.send(Err(PoolError::BacklogFull {
                capacity: self.config.backlog_capacity,
            }));
        } else {
            debug!(
                job_id = job.id,
                task = %job.task,
                queued = self.backlog.len() + 1,
                "📥 POOL: all workers busy, job queued"
            );
            self.backlog.push_back(job);
        }
    }

    /// Move a job from pending to in-flight on the given slot.
    async fn dispatch_to(&mut self, idx: usize, job: PendingJob) {
        let request = JobRequest {
            task: job.task.clone(),
            data: job.payload,
            task_id: job.id,
        };

        self.inflight.insert(
            job.id,
            InflightJob {
                slot: idx,
                task: job.task,
                submitted_at: job.submitted_at,
                reply: job.reply,
            },
        );
        let slot = &mut self.slots[idx];
        slot.phase = SlotPhase::Busy(job.id);

        debug!(
            job_id = request.task_id,
            task = %request.task,
            slot = idx,
            "📤 POOL: dispatching job to worker"
        );

        if let Err(e) = slot.send_job(&request).await {
            // The process died under us; its exit event will reject this job
            // through the crash path.
            warn!(
                slot = idx,
                job_id = request.task_id,
                error = %e,
                "⚠️ POOL: failed to write job to worker"
            );
        }
    }

    async fn handle_worker_message(&mut self, idx: usize, generation: u64, message: WorkerMessage) {
        if self.slots[idx].generation != generation {
            debug!(slot = idx, "POOL: discarding message from replaced worker");
            return;
        }

        match message {
            WorkerMessage::Ready(_) => self.handle_worker_ready(idx).await,
            WorkerMessage::Outcome(outcome) => self.complete_job(idx, outcome).await,
        }
    }

    async fn handle_worker_ready(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        if slot.phase != SlotPhase::Starting {
            debug!(slot = idx, "POOL: duplicate ready signal ignored");
            return;
        }

        slot.start_failures = 0;
        slot.phase = SlotPhase::Idle;
        info!(slot = idx, pid = slot.pid, "✅ POOL: worker ready");

        match self.phase {
            LifecyclePhase::Running => self.drain_one_into(idx).await,
            // A replacement that came up mid-shutdown is told to stop again.
            LifecyclePhase::Terminating => self.slots[idx].close_stdin(),
            _ => {}
        }
    }

    /// Route a terminal result back to its submitter (routing rule 2).
    async fn complete_job(&mut self, idx: usize, outcome: JobOutcome) {
        let Some(entry) = self.inflight.remove(&outcome.task_id) else {
            // Defensive: covers duplicate or late messages after a forced
            // slot replacement.
            debug!(
                slot = idx,
                task_id = outcome.task_id,
                "POOL: discarding result with unknown correlation id"
            );
            return;
        };

        if self.slots[entry.slot].busy_job() == Some(outcome.task_id) {
            self.slots[entry.slot].phase = SlotPhase::Idle;
        }

        let total_ms = (Utc::now() - entry.submitted_at).num_milliseconds();

        if outcome.success {
            info!(
                job_id = outcome.task_id,
                task = %entry.task,
                slot = entry.slot,
                worker_ms = outcome.duration,
                total_ms,
                "✅ POOL: job completed"
            );
            let output = TaskOutput {
                result: outcome.result.unwrap_or(Value::Null),
                duration_ms: outcome.duration.unwrap_or(0),
            };
            let _ = entry.reply.send(Ok(output));
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "task failed without error message".to_string());
            warn!(
                job_id = outcome.task_id,
                task = %entry.task,
                slot = entry.slot,
                error = %message,
                "⚠️ POOL: job failed"
            );
            let _ = entry.reply.send(Err(PoolError::TaskFailed { message }));
        }

        match self.phase {
            LifecyclePhase::Running => self.drain_one_into(entry.slot).await,
            LifecyclePhase::Draining if self.inflight.is_empty() => self.begin_terminating(),
            _ => {}
        }
    }

    /// Routing rule 3: a newly idle slot takes the backlog head, or stays
    /// idle when the backlog is empty. Strict FIFO, one entry per call.
    async fn drain_one_into(&mut self, idx: usize) {
        if self.phase != LifecyclePhase::Running || !self.slots[idx].is_idle() {
            return;
        }
        if let Some(job) = self.backlog.pop_front() {
            self.dispatch_to(idx, job).await;
        }
    }

    fn handle_worker_exited(&mut self, idx: usize, generation: u64, status: Option<ExitStatus>) {
        if self.slots[idx].generation != generation {
            debug!(slot = idx, "POOL: stale exit event from replaced worker");
            return;
        }

        let phase_at_exit = self.slots[idx].phase;
        self.slots[idx].mark_down();

        warn!(
            slot = idx,
            status = ?status,
            "⚠️ POOL: worker process exited"
        );

        // Crash isolation: only the job in flight on this slot is affected.
        if let SlotPhase::Busy(job_id) = phase_at_exit {
            if let Some(entry) = self.inflight.remove(&job_id) {
                error!(
                    slot = idx,
                    job_id,
                    task = %entry.task,
                    "❌ POOL: worker crashed while executing job"
                );
                let _ = entry
                    .reply
                    .send(Err(PoolError::WorkerCrashed { slot: idx, job_id }));
            }
        }

        match self.phase {
            LifecyclePhase::Running => {
                if phase_at_exit == SlotPhase::Starting {
                    self.slots[idx].start_failures += 1;
                    if self.slots[idx].start_failures >= self.config.spawn_retry_limit {
                        self.fail_pool(idx);
                        return;
                    }
                }
                self.schedule_respawn(idx);
            }
            LifecyclePhase::Draining => {
                // No replacement mid-shutdown; the crash may have emptied the
                // in-flight table.
                if self.inflight.is_empty() {
                    self.begin_terminating();
                }
            }
            LifecyclePhase::Terminating => {
                if !self.slots.iter().any(WorkerSlot::is_alive) {
                    self.finish_terminated();
                }
            }
            LifecyclePhase::Terminated => {}
        }
    }

    /// Replacement preserves identity and pool position; only the process
    /// behind the slot changes.
    fn schedule_respawn(&mut self, idx: usize) {
        let generation = self.slots[idx].generation;
        let delay = self.config.spawn_retry_delay();
        let events = self.events.clone();

        info!(slot = idx, delay_ms = delay.as_millis() as u64, "🔄 POOL: scheduling worker replacement");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(PoolEvent::RespawnDue { slot: idx, generation });
        });
    }

    fn handle_respawn_due(&mut self, idx: usize, generation: u64) {
        if self.phase != LifecyclePhase::Running
            || self.slots[idx].generation != generation
            || self.slots[idx].phase != SlotPhase::Down
        {
            return;
        }

        let program = self.worker_program.clone();
        let args = self.config.worker_args.clone();
        let events = self.events.clone();
        if let Err(e) = self.slots[idx].spawn(&program, &args, &events) {
            warn!(slot = idx, error = %e, "⚠️ POOL: worker respawn failed");
            self.slots[idx].start_failures += 1;
            if self.slots[idx].start_failures >= self.config.spawn_retry_limit {
                self.fail_pool(idx);
            } else {
                self.schedule_respawn(idx);
            }
        }
    }

    /// A slot exceeded its consecutive crash-on-start limit. Surfaced as a
    /// fatal pool condition: queued jobs are rejected and the pool shuts
    /// down rather than retrying forever.
    fn fail_pool(&mut self, idx: usize) {
        error!(
            dispatcher_id = %self.id,
            slot = idx,
            limit = self.config.spawn_retry_limit,
            "❌ POOL: worker slot exceeded spawn retry limit, failing pool"
        );

        for job in self.backlog.drain(..) {
            let _ = job.reply.send(Err(PoolError::SpawnFailed {
                slot: idx,
                message: "pool failed: worker slot could not be restarted".to_string(),
            }));
        }

        self.begin_terminating();
    }

    /// Publish a fresh occupancy snapshot for `Dispatcher::stats` readers.
    fn refresh_snapshot(&self) {
        let stats = PoolStats {
            total_workers: self.slots.len(),
            busy_workers: self
                .slots
                .iter()
                .filter(|s| s.busy_job().is_some())
                .count(),
            available_workers: self.slots.iter().filter(|s| s.is_idle()).count(),
            queued_jobs: self.backlog.len(),
            inflight_jobs: self.inflight.len(),
        };

        let workers = self
            .slots
            .iter()
            .map(|s| WorkerInfo {
                identity: s.identity,
                pid: s.pid,
                busy: s.busy_job().is_some(),
            })
            .collect();

        *self.snapshot.write() = PoolSnapshot { stats, workers };
    }
}
