//! Drains a label's stream and fans the values out to blocking jobs.
//!
//! The [`Orchestrator`] runs one [`ScopedSession`] over the label's
//! [`ResultStream`], then submits one [`Job`] per collected value to the
//! [`WorkerPool`] and waits for all of them. Submission order always matches
//! stream order; completion callbacks fire in whatever order the workers
//! finish.
//!
//! With [`DispatchMode::AfterDrain`] (the default) nothing is submitted until
//! the stream has ended and the session has been released. With
//! [`DispatchMode::Pipelined`] each value is submitted as soon as it arrives.
//!
//! Cancelling a run (dropping its future) never skips cleanup: the session's
//! teardown and the callbacks of already submitted jobs finish as detached
//! tasks. [`Orchestrator::settle`] and [`WorkerPool::shutdown`] wait for them.

use crate::{
    client::{FixedDelay, ResultStream, ScopedSession},
    config::{DispatchMode, OrchestratorConfig},
    error::Result,
    pool::{BoxError, Job, JobHandle, WorkerPool},
    protocol::Label,
};
use core::time::Duration;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Callback invoked once per job with its label and outcome.
pub type CompletionCallback = Arc<dyn Fn(&Label, &Result<String>) + Send + Sync>;

/// What one orchestrator run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Values drained from the stream, in arrival order.
    pub results: Vec<i64>,
    /// Job outputs, in submission order.
    pub outputs: Vec<String>,
}

/// Blocking work performed for each collected value: sleeps for `delay` and
/// reports completion.
pub fn blocking_task(label: &Label, delay: Duration) -> String {
    std::thread::sleep(delay);
    format!("done {label}")
}

/// Label of the job spawned for a collected value, e.g. `"block 3"`.
///
/// # Errors
///
/// Mirrors [`Label::new`]; any `i64` renders well within the byte budget.
pub fn job_label(value: i64) -> Result<Label> {
    Label::new(format!("block {value}"))
}

/// Drives one session-then-dispatch run against a counter service.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: Arc<WorkerPool>,
    teardowns: TaskTracker,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, pool: Arc<WorkerPool>) -> Self {
        Self {
            config,
            pool,
            teardowns: TaskTracker::new(),
        }
    }

    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Builds the session this orchestrator drains.
    pub fn session(&self) -> ScopedSession {
        let stream = ResultStream::new(self.config.server_addr.clone(), self.config.label.clone())
            .with_timeout(self.config.io_timeout);
        ScopedSession::new(
            stream,
            FixedDelay::new(self.config.setup_delay, self.config.teardown_delay),
        )
        .with_tracker(self.teardowns.clone())
    }

    /// Waits for session teardowns left behind by cancelled runs.
    pub async fn settle(&self) {
        self.teardowns.close();
        self.teardowns.wait().await;
        self.teardowns.reopen();
    }

    /// Runs the full sequence and reports each job through `on_complete`.
    ///
    /// Jobs that were already submitted are always waited for, even when the
    /// stream or a later submission fails, so every submitted job reports
    /// exactly once before this returns.
    ///
    /// # Errors
    ///
    /// - Session or stream errors (`ConnectionFailure`, `ProtocolDecode`,
    ///   `ResourceTeardown`).
    /// - Submission errors from the pool.
    /// - `JobsFailed` if any job failed.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(label = %self.config.label))
    )]
    pub async fn run<F>(&self, on_complete: F) -> Result<RunReport>
    where
        F: Fn(&Label, &Result<String>) + Send + Sync + 'static,
    {
        let on_complete: CompletionCallback = Arc::new(on_complete);
        let mut results = Vec::new();
        let mut handles = Vec::new();

        let dispatched = match self.config.dispatch {
            DispatchMode::AfterDrain => {
                match self.session().run(async |stream| stream.drain().await).await {
                    Ok(drained) => {
                        #[cfg(feature = "tracing")]
                        tracing::info!("results = {drained:?}");
                        results = drained;
                        self.submit_all(&results, &on_complete, &mut handles)
                    }
                    Err(e) => Err(e),
                }
            }
            DispatchMode::Pipelined => {
                self.session()
                    .run(async |stream| {
                        while let Some(value) = stream.next().await? {
                            results.push(value);
                            handles.push(self.submit(value, &on_complete)?);
                        }
                        Ok(())
                    })
                    .await
            }
        };

        let waited = WorkerPool::wait_all(handles).await;
        dispatched?;

        Ok(RunReport {
            results,
            outputs: waited?,
        })
    }

    fn submit_all(
        &self,
        values: &[i64],
        on_complete: &CompletionCallback,
        handles: &mut Vec<JobHandle>,
    ) -> Result<()> {
        for &value in values {
            handles.push(self.submit(value, on_complete)?);
        }
        Ok(())
    }

    fn submit(&self, value: i64, on_complete: &CompletionCallback) -> Result<JobHandle> {
        let label = job_label(value)?;
        let delay = self.config.job_delay;
        let job = Job::new(label.clone(), move || {
            Ok::<_, BoxError>(blocking_task(&label, delay))
        });

        let on_complete = Arc::clone(on_complete);
        Ok(self
            .pool
            .submit(job)?
            .on_complete(move |label, outcome| on_complete(label, outcome)))
    }
}

impl core::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("workers", &self.pool.num_workers())
            .finish()
    }
}
