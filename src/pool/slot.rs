//! # Worker Slot Management
//!
//! One pool position backed by one OS process. The slot's `identity` is
//! stable for the dispatcher's lifetime; the process behind it is replaceable.
//! A `generation` counter distinguishes incarnations so messages and exit
//! notifications from a replaced process are recognized as stale and
//! discarded.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::protocol::{JobRequest, WorkerMessage};

use super::PoolEvent;

/// Lifecycle phase of the process currently backing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Process spawned, ready signal not yet received.
    Starting,
    /// Ready and holding no job.
    Idle,
    /// Exactly one job dispatched, identified by its correlation id.
    Busy(u64),
    /// Process exited; a respawn is pending or the pool is shutting down.
    Down,
}

/// Dispatcher-side proxy for one worker process.
pub struct WorkerSlot {
    /// Stable logical index (0..N-1), preserved across replacement.
    pub identity: usize,
    /// Incremented on every spawn; tags events from this incarnation.
    pub generation: u64,
    pub phase: SlotPhase,
    /// OS pid of the current incarnation, if alive.
    pub pid: Option<u32>,
    /// Consecutive spawn attempts that died before signalling ready.
    pub start_failures: u32,
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerSlot {
    pub fn new(identity: usize) -> Self {
        Self {
            identity,
            generation: 0,
            phase: SlotPhase::Down,
            pid: None,
            start_failures: 0,
            stdin: None,
            kill: None,
        }
    }

    /// Spawn (or respawn) the worker process backing this slot, wiring its
    /// stdout lines and exit status into the routing loop as events.
    pub fn spawn(
        &mut self,
        program: &Path,
        args: &[String],
        events: &UnboundedSender<PoolEvent>,
    ) -> Result<()> {
        self.generation += 1;
        self.phase = SlotPhase::Starting;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PoolError::SpawnFailed {
                slot: self.identity,
                message: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| PoolError::Channel {
            message: format!("no stdin pipe for slot {}", self.identity),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PoolError::Channel {
            message: format!("no stdout pipe for slot {}", self.identity),
        })?;

        self.pid = child.id();
        self.stdin = Some(stdin);

        let identity = self.identity;
        let generation = self.generation;
        debug!(
            slot = identity,
            generation,
            pid = self.pid,
            "🔄 SLOT: spawned worker process"
        );

        // Reader: one protocol message per stdout line.
        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WorkerMessage>(&line) {
                            Ok(message) => {
                                let event = PoolEvent::WorkerMessage {
                                    slot: identity,
                                    generation,
                                    message,
                                };
                                if reader_events.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    slot = identity,
                                    error = %e,
                                    "⚠️ SLOT: discarding unparseable worker line"
                                );
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(slot = identity, error = %e, "SLOT: stdout read ended");
                        break;
                    }
                }
            }
        });

        // Exit watcher: the authoritative liveness signal. The force-kill
        // trigger also fires when the slot drops its sender, so an abandoned
        // slot can never leak a live process.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        self.kill = Some(kill_tx);
        let exit_events = events.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            // Drain stdout to EOF before reporting the exit: a result line
            // written just before the process died must reach the routing
            // loop ahead of the exit event.
            let _ = reader.await;
            let _ = exit_events.send(PoolEvent::WorkerExited {
                slot: identity,
                generation,
                status,
            });
        });

        Ok(())
    }

    /// Write one job line to the worker's stdin.
    ///
    /// A write failure means the process died under us; the exit watcher will
    /// deliver the crash event and the in-flight job is rejected there.
    pub async fn send_job(&mut self, request: &JobRequest) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| PoolError::Channel {
            message: format!("slot {} has no live worker", self.identity),
        })?;

        let mut line = serde_json::to_string(request).map_err(|e| PoolError::Channel {
            message: e.to_string(),
        })?;
        line.push('\n');

        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Graceful stop: closing stdin makes the runtime's read loop end and the
    /// process exit cleanly.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Forced stop: SIGKILL the current incarnation.
    pub fn force_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    /// Mark the current incarnation dead. Called when its exit event arrives.
    pub fn mark_down(&mut self) {
        self.phase = SlotPhase::Down;
        self.pid = None;
        self.stdin = None;
        self.kill = None;
    }

    pub fn is_idle(&self) -> bool {
        self.phase == SlotPhase::Idle
    }

    pub fn is_alive(&self) -> bool {
        self.pid.is_some()
    }

    /// Correlation id of the job dispatched to this slot, if any.
    pub fn busy_job(&self) -> Option<u64> {
        match self.phase {
            SlotPhase::Busy(job_id) => Some(job_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_starts_down() {
        let slot = WorkerSlot::new(3);
        assert_eq!(slot.identity, 3);
        assert_eq!(slot.phase, SlotPhase::Down);
        assert!(!slot.is_alive());
        assert!(slot.busy_job().is_none());
    }

    #[test]
    fn test_busy_job_extraction() {
        let mut slot = WorkerSlot::new(0);
        slot.phase = SlotPhase::Busy(41);
        assert_eq!(slot.busy_job(), Some(41));
        assert!(!slot.is_idle());

        slot.mark_down();
        assert_eq!(slot.phase, SlotPhase::Down);
        assert!(slot.busy_job().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_for_missing_program() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut slot = WorkerSlot::new(0);
        let err = slot
            .spawn(Path::new("/nonexistent/worker-binary"), &[], &tx)
            .unwrap_err();
        assert!(matches!(err, PoolError::SpawnFailed { slot: 0, .. }));
    }
}
