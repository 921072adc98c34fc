//! # Shutdown Coordinator
//!
//! Drives the pool through running -> draining -> terminating -> terminated.
//!
//! Draining lets in-flight jobs finish within a bounded window; jobs still
//! outstanding when it elapses are rejected with `ShutdownTimeout` so no
//! caller is ever left hanging. Terminating closes each worker's stdin (the
//! graceful stop signal) and force-kills any process still alive after the
//! terminate window. Shutdown is idempotent: repeated or concurrent requests
//! attach to the in-progress sequence and observe the same outcome.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{PoolError, Result};

use super::router::Router;
use super::slot::WorkerSlot;
use super::PoolEvent;

/// Lifecycle state of the pool as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecyclePhase {
    Running,
    Draining,
    Terminating,
    Terminated,
}

impl Router {
    pub(super) fn handle_shutdown(
        &mut self,
        drain_timeout: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        self.shutdown_replies.push(reply);

        // Idempotence: later requests just attach to the sequence above.
        if self.phase != LifecyclePhase::Running {
            return;
        }

        self.phase = LifecyclePhase::Draining;
        let drain = drain_timeout.unwrap_or_else(|| self.config.drain_timeout());

        info!(
            dispatcher_id = %self.id,
            inflight = self.inflight.len(),
            queued = self.backlog.len(),
            drain_ms = drain.as_millis() as u64,
            "🛑 POOL: shutdown requested, draining in-flight jobs"
        );

        // Queued jobs never started; reject them now rather than abandoning
        // them silently.
        for job in self.backlog.drain(..) {
            let _ = job.reply.send(Err(PoolError::ShuttingDown));
        }

        if self.inflight.is_empty() {
            self.begin_terminating();
            return;
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            let _ = events.send(PoolEvent::DrainElapsed);
        });
    }

    /// The drain window elapsed with jobs still in flight: abandon them,
    /// notifying their submitters.
    pub(super) fn handle_drain_elapsed(&mut self) {
        if self.phase != LifecyclePhase::Draining {
            return;
        }

        warn!(
            dispatcher_id = %self.id,
            abandoned = self.inflight.len(),
            "⚠️ POOL: drain window elapsed, abandoning in-flight jobs"
        );

        for (job_id, entry) in self.inflight.drain() {
            let _ = entry
                .reply
                .send(Err(PoolError::ShutdownTimeout { job_id }));
        }

        self.begin_terminating();
    }

    /// Send the graceful stop signal to every worker and arm the force-kill
    /// timer.
    pub(super) fn begin_terminating(&mut self) {
        self.phase = LifecyclePhase::Terminating;
        info!(dispatcher_id = %self.id, "🛑 POOL: terminating workers");

        for slot in &mut self.slots {
            slot.close_stdin();
        }

        if !self.slots.iter().any(WorkerSlot::is_alive) {
            self.finish_terminated();
            return;
        }

        let terminate = self.config.terminate_timeout();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(terminate).await;
            let _ = events.send(PoolEvent::TerminateElapsed);
        });
    }

    /// The terminate window elapsed: force-kill survivors. Their exit events
    /// complete the transition to terminated.
    pub(super) fn handle_terminate_elapsed(&mut self) {
        if self.phase != LifecyclePhase::Terminating {
            return;
        }

        for slot in &mut self.slots {
            if slot.is_alive() {
                warn!(
                    slot = slot.identity,
                    pid = slot.pid,
                    "⚠️ POOL: worker ignored graceful stop, force-killing"
                );
                slot.force_kill();
            }
        }
    }

    /// Every slot's process has exited or been killed.
    pub(super) fn finish_terminated(&mut self) {
        self.phase = LifecyclePhase::Terminated;
        info!(dispatcher_id = %self.id, "🛑 POOL: shutdown complete");

        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }
}
