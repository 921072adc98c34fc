//! # Wire Protocol
//!
//! Message shapes exchanged between the dispatcher and its worker processes.
//! One JSON document per line: jobs flow down the worker's stdin, the ready
//! signal and results flow back up its stdout. Field names are camelCase on
//! the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dispatcher -> worker: execute one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Symbolic task name resolved by the worker's task registry.
    pub task: String,
    /// Opaque task-specific payload.
    pub data: Value,
    /// Correlation id linking this job to its eventual result message.
    pub task_id: u64,
}

/// Worker -> dispatcher messages.
///
/// Untagged on the wire: the ready signal carries a `ready` field, outcomes a
/// `success` field, so the shapes never overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    /// Sent once on process start, before the worker accepts jobs. This is
    /// how the dispatcher learns a freshly spawned replacement is usable.
    Ready(ReadySignal),
    /// Terminal result for exactly one job.
    Outcome(JobOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadySignal {
    pub ready: bool,
}

/// Terminal result or error for one job, tagged with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Wall-clock execution time in milliseconds, measured by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub task: String,
    pub task_id: u64,
}

impl WorkerMessage {
    pub fn ready() -> Self {
        WorkerMessage::Ready(ReadySignal { ready: true })
    }
}

impl JobOutcome {
    pub fn success(task: &str, task_id: u64, result: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            duration: Some(duration_ms),
            error: None,
            task: task.to_string(),
            task_id,
        }
    }

    pub fn failure(task: &str, task_id: u64, error: String) -> Self {
        Self {
            success: false,
            result: None,
            duration: None,
            error: Some(error),
            task: task.to_string(),
            task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_request_wire_shape() {
        let request = JobRequest {
            task: "generatePrimes".to_string(),
            data: json!({"limit": 30}),
            task_id: 7,
        };

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["task"], "generatePrimes");
        assert_eq!(wire["taskId"], 7);
        assert_eq!(wire["data"]["limit"], 30);
    }

    #[test]
    fn test_ready_signal_parses_as_ready() {
        let message: WorkerMessage = serde_json::from_str(r#"{"ready": true}"#).unwrap();
        assert!(matches!(
            message,
            WorkerMessage::Ready(ReadySignal { ready: true })
        ));
    }

    #[test]
    fn test_success_outcome_wire_shape() {
        let outcome = JobOutcome::success("heavyComputation", 3, json!(49999995000000.0), 120);
        let wire = serde_json::to_value(&WorkerMessage::Outcome(outcome)).unwrap();

        assert_eq!(wire["success"], true);
        assert_eq!(wire["taskId"], 3);
        assert_eq!(wire["duration"], 120);
        assert_eq!(wire["task"], "heavyComputation");
        // A success never carries an error field
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn test_failure_outcome_parses_as_outcome() {
        let line = r#"{"success": false, "error": "unknown task: nope", "task": "nope", "taskId": 9}"#;
        let message: WorkerMessage = serde_json::from_str(line).unwrap();

        match message {
            WorkerMessage::Outcome(outcome) => {
                assert!(!outcome.success);
                assert_eq!(outcome.task_id, 9);
                assert_eq!(outcome.error.as_deref(), Some("unknown task: nope"));
                assert!(outcome.result.is_none());
            }
            other => panic!("expected outcome, got {other:?}"),
        }
    }
}
