//! Worker process entry point, spawned by the dispatcher for each pool slot.

use anyhow::Result;

fn main() -> Result<()> {
    taskpool_core::logging::init_worker_logging();
    taskpool_core::worker::run()?;
    Ok(())
}
