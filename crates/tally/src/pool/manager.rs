//! Thread-backed worker pool for blocking jobs.
//!
//! This module defines the [`WorkerPool`] struct, which owns a fixed set of
//! worker threads and hands them [`Job`]s in round-robin order. Each worker
//! listens on its own unbounded [`mpsc::UnboundedReceiver`], so submission
//! never blocks the caller and never waits on a busy worker.
//!
//! Results travel back through one-shot channels wrapped in [`JobHandle`]s.
//! [`WorkerPool::wait_all`] drives a batch of handles concurrently; each
//! handle fires its completion callbacks as soon as its own result arrives.

use super::{
    request::{Job, JobHandle, WorkRequest},
    worker::worker_loop,
};
use crate::{
    config::PoolConfig,
    error::{Error, Result},
};
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::thread;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// A fixed pool of OS threads that run blocking [`Job`]s.
pub struct WorkerPool {
    workers: Vec<mpsc::UnboundedSender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
    notifiers: TaskTracker,
}

impl WorkerPool {
    /// Spawns `config.num_workers` worker threads.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `num_workers` is zero.
    /// - [`Error::ChannelError`] if a thread cannot be spawned.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        if config.num_workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "worker pool needs at least one worker".to_string(),
            });
        }

        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            let (tx, rx) = mpsc::unbounded_channel();
            thread::Builder::new()
                .name(format!("tally-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx))
                .map_err(|e| Error::ChannelError {
                    context: format!("failed to spawn worker {worker_id}: {e}"),
                })?;
            workers.push(tx);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker pool started with {} workers", workers.len());

        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout: config.shutdown_timeout,
            notifiers: TaskTracker::new(),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Returns the index of the next worker to receive work (round-robin).
    fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Queues `job` on the next worker and returns its handle.
    ///
    /// Never blocks: the job is queued even if every worker is busy.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if [`shutdown`](Self::shutdown) has begun.
    /// - [`Error::ChannelError`] if the chosen worker has stopped.
    pub fn submit(&self, job: Job) -> Result<JobHandle> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let label = job.label().clone();
        let (tx, rx) = oneshot::channel();

        self.workers[worker_idx]
            .send(WorkRequest::Run { job, response: tx })
            .map_err(|_| Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            })?;

        #[cfg(feature = "tracing")]
        tracing::trace!("Job '{label}' queued on worker {worker_idx}");

        Ok(JobHandle::new(label, rx, self.notifiers.clone()))
    }

    /// Waits for every handle to resolve and returns the outputs in the
    /// handles' order.
    ///
    /// All handles are driven concurrently and none is abandoned early: the
    /// call resolves only after every job has completed or failed, so every
    /// registered callback has fired by then.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobsFailed`] with the failure count and the first
    /// failure in handle order if any job failed.
    pub async fn wait_all<I>(handles: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = JobHandle>,
    {
        let outcomes = futures::future::join_all(handles).await;
        let total = outcomes.len();

        let mut outputs = Vec::with_capacity(total);
        let mut failed = 0;
        let mut first = None;
        for outcome in outcomes {
            match outcome {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    failed += 1;
                    first.get_or_insert(e);
                }
            }
        }

        match first {
            None => Ok(outputs),
            Some(first) => Err(Error::JobsFailed {
                failed,
                total,
                first: Box::new(first),
            }),
        }
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Refuses new submissions.
    /// - Sends a [`WorkRequest::Shutdown`] to each worker, queued behind any
    ///   jobs it already holds.
    /// - Waits up to the configured timeout per worker for acknowledgement.
    /// - Waits up to the same timeout for callbacks of dropped handles.
    pub async fn shutdown(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool refusing new jobs");
        self.shutdown_token.cancel();

        let mut acks = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(_e) = worker.send(WorkRequest::Shutdown { response: tx }) {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send shutdown to worker {i}: {_e}");
            } else {
                acks.push((i, rx));
            }
        }

        let limit = self.shutdown_timeout;
        let waits = acks.into_iter().map(|(_i, rx)| async move {
            match timeout(limit, rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} returned error: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });

        futures::future::join_all(waits).await;

        // Callbacks of dropped handles fire once their worker answered.
        self.notifiers.close();
        if timeout(limit, self.notifiers.wait()).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "{} detached notifications still pending",
                self.notifiers.len()
            );
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}
