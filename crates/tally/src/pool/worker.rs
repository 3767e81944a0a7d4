//! Worker thread loop.
//!
//! Each worker is a dedicated OS thread that blocks on its own channel and
//! runs [`Job`]s one at a time. Blocking and CPU-bound work therefore never
//! runs on the scheduler's thread. Panics inside a job are caught here and
//! reported as [`Error::WorkerFailure`], so a misbehaving job cannot take its
//! worker down.

use super::request::{Job, WorkRequest};
use crate::error::{Error, Result};
use core::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::sync::mpsc;

/// Main loop of a worker thread.
///
/// Runs until a [`WorkRequest::Shutdown`] arrives or every sender is dropped.
pub(crate) fn worker_loop(worker_id: usize, mut rx: mpsc::UnboundedReceiver<WorkRequest>) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.blocking_recv() {
        match work {
            WorkRequest::Run { job, response } => {
                let outcome = run_job(worker_id, job);
                if response.send(outcome).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {worker_id} finished a job nobody is waiting for");
                }
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

fn run_job(_worker_id: usize, job: Job) -> Result<String> {
    let Job { label, task } = job;

    #[cfg(feature = "tracing")]
    tracing::debug!("Worker {_worker_id} running job '{label}'");

    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::WorkerFailure {
            label: label.to_string(),
            reason: e.to_string(),
        }),
        Err(payload) => Err(Error::WorkerFailure {
            label: label.to_string(),
            reason: format!("job panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
