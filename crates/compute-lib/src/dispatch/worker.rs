//! Isolated execution of a single computation
//!
//! Each computation runs on a dedicated OS thread that owns a copy of its
//! inputs and reports exactly one outcome over a single-use channel. A
//! worker that dies without reporting (panic, abort) drops its sender, which
//! the parent observes as a receive error, distinct from a domain error.

use std::time::Duration;

use num_bigint::BigInt;
use tokio::sync::oneshot;

use super::ComputeError;
use crate::engine::{ComputeTask, DomainError};

/// Run `task` on its own thread and wait for the single outcome.
pub(super) async fn run_isolated(
    task: ComputeTask,
    timeout: Option<Duration>,
) -> Result<BigInt, ComputeError> {
    let (tx, rx) = oneshot::channel();
    let name = format!("compute-{}", task.operation());

    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            let outcome = task.run();
            // The parent may have stopped waiting (timeout); nothing to do.
            let _ = tx.send(outcome);
        })
        .map_err(|e| ComputeError::WorkerFailure(format!("failed to spawn worker: {e}")))?;

    let outcome = await_outcome(rx, timeout).await?;
    outcome.map_err(|e: DomainError| ComputeError::Domain(e.to_string()))
}

/// Wait for the worker's single message, bounding the wait when a timeout
/// is configured. A timed-out worker thread is abandoned; it finishes (or
/// dies) on its own without anyone reading the result.
pub(super) async fn await_outcome(
    rx: oneshot::Receiver<Result<BigInt, DomainError>>,
    timeout: Option<Duration>,
) -> Result<Result<BigInt, DomainError>, ComputeError> {
    let received = match timeout {
        Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
            ComputeError::WorkerFailure(format!(
                "computation did not finish within {}ms",
                limit.as_millis()
            ))
        })?,
        None => rx.await,
    };

    received.map_err(|_| {
        ComputeError::WorkerFailure("worker exited without reporting a result".to_string())
    })
}
