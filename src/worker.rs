//! # Worker Runtime
//!
//! The loop loaded into each worker process. Reads one job per line from
//! stdin, executes the named task synchronously, and writes exactly one result
//! line to stdout. The runtime has no internal concurrency: a job performs
//! blocking CPU work by design, which is the reason it runs in a separate
//! process at all.
//!
//! Stdout is the protocol channel; all logging goes to stderr. EOF on stdin is
//! the graceful stop signal.

use std::io::{self, BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use crate::protocol::{JobOutcome, JobRequest, WorkerMessage};
use crate::tasks::{self, TaskKind};

/// Run the worker loop until stdin closes.
///
/// Announces readiness before accepting jobs so the dispatcher knows a freshly
/// spawned replacement is usable.
pub fn run() -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    send(&mut out, &WorkerMessage::ready())?;
    info!(pid = std::process::id(), "👷 WORKER: ready, awaiting jobs");

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: JobRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(parse_err) => {
                // Report the parse failure if a correlation id is recoverable,
                // otherwise the dispatcher has nothing to route it to.
                match recover_task_id(&line) {
                    Some(task_id) => {
                        let outcome = JobOutcome::failure(
                            "unknown",
                            task_id,
                            format!("malformed job message: {parse_err}"),
                        );
                        send(&mut out, &WorkerMessage::Outcome(outcome))?;
                    }
                    None => {
                        warn!(error = %parse_err, "⚠️ WORKER: discarding malformed job line");
                    }
                }
                continue;
            }
        };

        let outcome = execute_request(&request);
        send(&mut out, &WorkerMessage::Outcome(outcome))?;
    }

    info!(pid = std::process::id(), "👷 WORKER: stdin closed, exiting");
    Ok(())
}

/// Execute one job, converting every failure mode into a failed outcome.
///
/// Task panics are caught here so the process survives and returns to idle;
/// only an external signal can take the worker down mid-job.
fn execute_request(request: &JobRequest) -> JobOutcome {
    let started = Instant::now();

    let task = request.task.clone();
    let data = request.data.clone();
    let run = move || -> Result<Value, tasks::TaskError> {
        let kind = TaskKind::from_str(&task)?;
        tasks::execute(kind, &data)
    };

    match catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(result)) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            JobOutcome::success(&request.task, request.task_id, result, duration_ms)
        }
        Ok(Err(task_err)) => JobOutcome::failure(&request.task, request.task_id, task_err.to_string()),
        Err(panic) => JobOutcome::failure(
            &request.task,
            request.task_id,
            format!("task panicked: {}", panic_message(panic.as_ref())),
        ),
    }
}

fn send(out: &mut impl Write, message: &WorkerMessage) -> io::Result<()> {
    let line = serde_json::to_string(message).map_err(io::Error::other)?;
    writeln!(out, "{line}")?;
    out.flush()
}

fn recover_task_id(line: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("taskId")?.as_u64()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_success_carries_duration() {
        let request = JobRequest {
            task: "generatePrimes".to_string(),
            data: json!({"limit": 30}),
            task_id: 1,
        };

        let outcome = execute_request(&request);
        assert!(outcome.success);
        assert_eq!(outcome.task_id, 1);
        assert!(outcome.duration.is_some());
        assert_eq!(
            outcome.result.unwrap(),
            json!([2, 3, 5, 7, 11, 13, 17, 19, 23, 29])
        );
    }

    #[test]
    fn test_execute_request_unknown_task() {
        let request = JobRequest {
            task: "doesNotExist".to_string(),
            data: json!({}),
            task_id: 2,
        };

        let outcome = execute_request(&request);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unknown task: doesNotExist"));
        assert!(outcome.result.is_none());
    }

    #[test]
    fn test_recover_task_id_from_partial_message() {
        assert_eq!(recover_task_id(r#"{"taskId": 42, "junk": []}"#), Some(42));
        assert_eq!(recover_task_id("not json at all"), None);
        assert_eq!(recover_task_id(r#"{"task": "x"}"#), None);
    }
}
