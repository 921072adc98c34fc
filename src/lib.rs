#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskpool Core
//!
//! A process-pool task dispatcher: a fixed set of worker OS processes execute
//! CPU-bound jobs on behalf of a request-serving front end, communicating over
//! newline-delimited JSON on each worker's stdin/stdout.
//!
//! ## Architecture
//!
//! The dispatcher owns N worker slots, a FIFO backlog of pending jobs, and an
//! in-flight table keyed by correlation id. All bookkeeping is serialized
//! through a single routing loop fed by one channel, so no mutation ever
//! observes a half-applied state transition. Worker processes share nothing
//! with each other or the dispatcher beyond the message channel; a crashed
//! worker takes down exactly one job and is replaced in place without changing
//! the pool size.
//!
//! ## Module Organization
//!
//! - [`pool`] - Dispatcher, worker slots, routing loop, shutdown coordinator
//! - [`worker`] - Worker runtime loaded into each spawned process
//! - [`protocol`] - Wire message shapes exchanged with workers
//! - [`tasks`] - Closed registry of CPU-bound task kinds
//! - [`config`] - Pool configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`logging`] - Tracing subscriber initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskpool_core::{Dispatcher, PoolConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(PoolConfig::default())?;
//!
//! let output = dispatcher
//!     .submit("generatePrimes", json!({"limit": 30}))
//!     .await?;
//! println!("primes: {} ({}ms)", output.result, output.duration_ms);
//!
//! dispatcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod tasks;
pub mod worker;

pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use pool::{Dispatcher, PoolStats, TaskOutput, WorkerInfo};
pub use tasks::TaskKind;
