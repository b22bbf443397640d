//! Bounded task execution.
//!
//! A unit of work runs as its own tokio task and is raced against a deadline.
//! Panics inside the work become `DirectorError::PanicRecovered`; they never
//! reach the supervising task. On timeout the task is detached, not aborted:
//! it keeps running and its eventual result is discarded.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::errors::{DirectorError, DirectorResult};

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `work`, converting a panic into an error result.
pub async fn fault_barrier<F, T>(work: F) -> DirectorResult<T>
where
    F: Future<Output = DirectorResult<T>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            error!("Recovered from panic: {}", message);
            Err(DirectorError::PanicRecovered(message))
        }
    }
}

/// Spawn `work` and wait for it at most `deadline`.
///
/// `cancel` is cancelled when the deadline fires so the work can stop at its
/// next safe point; nothing forces it to.
pub async fn run_bounded<F, T>(work: F, deadline: Duration, cancel: CancellationToken) -> DirectorResult<T>
where
    F: Future<Output = DirectorResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fault_barrier(work));

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "worker task was cancelled".to_string()
            };
            error!("Worker task failed: {}", message);
            Err(DirectorError::PanicRecovered(message))
        }
        Err(_) => {
            warn!("Deadline of {:?} elapsed; abandoning worker result", deadline);
            cancel.cancel();
            Err(DirectorError::Timeout(deadline))
        }
    }
}
