//! # CPU-Bound Task Registry
//!
//! The closed set of task kinds the worker runtime can execute, plus the task
//! bodies themselves. Adding a task means adding an enum variant and its
//! handler here; the dispatcher never changes. Task names are matched at the
//! worker boundary; an unrecognized name is a typed error, not a crash.

use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use thiserror::Error;

/// Errors recovered entirely within the worker runtime and reported back as
/// failed results.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("unknown task: {name}")]
    UnknownTask { name: String },

    #[error("invalid payload for {task}: {message}")]
    InvalidPayload { task: &'static str, message: String },
}

/// The closed set of task kinds workers know how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    HeavyComputation,
    ProcessArray,
    GeneratePrimes,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::HeavyComputation => "heavyComputation",
            TaskKind::ProcessArray => "processArray",
            TaskKind::GeneratePrimes => "generatePrimes",
        }
    }

    pub fn all() -> &'static [TaskKind] {
        &[
            TaskKind::HeavyComputation,
            TaskKind::ProcessArray,
            TaskKind::GeneratePrimes,
        ]
    }
}

impl FromStr for TaskKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heavyComputation" => Ok(TaskKind::HeavyComputation),
            "processArray" => Ok(TaskKind::ProcessArray),
            "generatePrimes" => Ok(TaskKind::GeneratePrimes),
            other => Err(TaskError::UnknownTask {
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
struct HeavyComputationParams {
    #[serde(default = "default_n")]
    n: u64,
}

fn default_n() -> u64 {
    10_000_000
}

#[derive(Deserialize)]
struct ProcessArrayParams {
    #[serde(default)]
    numbers: Vec<u64>,
}

#[derive(Deserialize)]
struct GeneratePrimesParams {
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_limit() -> u64 {
    1_000
}

/// Largest accepted `generatePrimes` limit. The sieve allocates one byte per
/// candidate, so an unbounded limit would abort the worker on allocation
/// failure instead of failing the task.
pub const MAX_PRIME_LIMIT: u64 = 100_000_000;

/// Execute one task against its payload. Payload fields are optional; missing
/// fields fall back to the registry defaults.
pub fn execute(kind: TaskKind, data: &Value) -> Result<Value, TaskError> {
    match kind {
        TaskKind::HeavyComputation => {
            let params: HeavyComputationParams = parse_params(kind, data)?;
            Ok(json!(heavy_computation(params.n)))
        }
        TaskKind::ProcessArray => {
            let params: ProcessArrayParams = parse_params(kind, data)?;
            Ok(json!(process_array(&params.numbers)))
        }
        TaskKind::GeneratePrimes => {
            let params: GeneratePrimesParams = parse_params(kind, data)?;
            if params.limit > MAX_PRIME_LIMIT {
                return Err(TaskError::InvalidPayload {
                    task: kind.name(),
                    message: format!(
                        "limit {} exceeds maximum of {MAX_PRIME_LIMIT}",
                        params.limit
                    ),
                });
            }
            Ok(json!(generate_primes(params.limit)))
        }
    }
}

fn parse_params<'de, T: Deserialize<'de>>(kind: TaskKind, data: &'de Value) -> Result<T, TaskError> {
    T::deserialize(data).map_err(|e| TaskError::InvalidPayload {
        task: kind.name(),
        message: e.to_string(),
    })
}

/// Sum of 0..n, accumulated in floating point.
pub fn heavy_computation(n: u64) -> f64 {
    let mut total = 0.0;
    for i in 0..n {
        total += i as f64;
    }
    total
}

/// For each element `num`, the sum of `sqrt(i) * sin(i)` for `i` in 0..num.
pub fn process_array(numbers: &[u64]) -> Vec<f64> {
    numbers
        .iter()
        .map(|&num| {
            let mut acc = 0.0;
            for i in 0..num {
                let x = i as f64;
                acc += x.sqrt() * x.sin();
            }
            acc
        })
        .collect()
}

/// Primes up to and including `limit`, via a sieve of Eratosthenes.
pub fn generate_primes(limit: u64) -> Vec<u64> {
    if limit < 2 {
        return Vec::new();
    }

    let limit = limit as usize;
    let mut is_prime = vec![true; limit + 1];
    is_prime[0] = false;
    is_prime[1] = false;

    let mut i = 2;
    while i * i <= limit {
        if is_prime[i] {
            let mut j = i * i;
            while j <= limit {
                is_prime[j] = false;
                j += i;
            }
        }
        i += 1;
    }

    (2..=limit)
        .filter(|&n| is_prime[n])
        .map(|n| n as u64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_unknown_task_name() {
        let err = TaskKind::from_str("doesNotExist").unwrap_err();
        assert_eq!(err.to_string(), "unknown task: doesNotExist");
    }

    #[test]
    fn test_task_name_round_trip() {
        for kind in TaskKind::all() {
            assert_eq!(TaskKind::from_str(kind.name()).unwrap(), *kind);
        }
    }

    #[test]
    fn test_generate_primes_up_to_30() {
        assert_eq!(
            generate_primes(30),
            vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]
        );
    }

    #[test]
    fn test_generate_primes_small_limits() {
        assert!(generate_primes(0).is_empty());
        assert!(generate_primes(1).is_empty());
        assert_eq!(generate_primes(2), vec![2]);
    }

    #[test]
    fn test_heavy_computation_matches_closed_form() {
        // sum of 0..n == n*(n-1)/2, exactly representable here
        assert_eq!(heavy_computation(1_000), 499_500.0);
        assert_eq!(heavy_computation(0), 0.0);
    }

    #[test]
    fn test_execute_applies_payload_defaults() {
        let result = execute(TaskKind::GeneratePrimes, &json!({})).unwrap();
        let primes = result.as_array().unwrap();
        // default limit is 1000; 997 is the largest prime below it
        assert_eq!(primes.last().unwrap().as_u64(), Some(997));
    }

    #[test]
    fn test_execute_rejects_oversized_prime_limit() {
        let err = execute(TaskKind::GeneratePrimes, &json!({"limit": u64::MAX})).unwrap_err();
        match err {
            TaskError::InvalidPayload { task, message } => {
                assert_eq!(task, "generatePrimes");
                assert!(message.contains("exceeds maximum"), "{message}");
            }
            other => panic!("expected InvalidPayload, got {other}"),
        }

        // In-range limits are unaffected.
        assert!(execute(TaskKind::GeneratePrimes, &json!({"limit": 100})).is_ok());
    }

    #[test]
    fn test_execute_rejects_malformed_payload() {
        let err = execute(TaskKind::ProcessArray, &json!({"numbers": "nope"})).unwrap_err();
        assert!(matches!(err, TaskError::InvalidPayload { task: "processArray", .. }));
    }

    #[test]
    fn test_process_array_empty_default() {
        let result = execute(TaskKind::ProcessArray, &json!({})).unwrap();
        assert_eq!(result, json!([]));
    }

    fn is_prime_trial(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        let mut d = 2;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 1;
        }
        true
    }

    proptest! {
        #[test]
        fn test_sieve_matches_trial_division(limit in 0u64..500) {
            let sieved = generate_primes(limit);
            let expected: Vec<u64> = (0..=limit).filter(|&n| is_prime_trial(n)).collect();
            prop_assert_eq!(sieved, expected);
        }
    }
}
