//! Jobs, the messages that carry them to worker threads, and the handles
//! that bring their results back.
//!
//! A [`Job`] pairs a [`Label`] with a blocking function. Submitting it yields
//! a [`JobHandle`], a future that resolves once the worker has run the
//! function. Completion callbacks registered with
//! [`JobHandle::on_complete`] fire when the handle resolves, on the task that
//! drives it, so results never cross back into the scheduler through shared
//! mutable state.
//!
//! A handle dropped before it resolved hands its callbacks to a detached
//! notifier task on the pool's [`TaskTracker`], so every job with callbacks
//! still reports exactly once.

use crate::{
    error::{Error, Result},
    protocol::Label,
};
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll, ready},
};
use pin_project_lite::pin_project;
use tokio::{
    runtime::Handle,
    sync::oneshot::{self, error::RecvError},
};
use tokio_util::task::TaskTracker;

/// Error type a blocking function may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type BlockingTask = Box<dyn FnOnce() -> core::result::Result<String, BoxError> + Send>;

type Callback = Box<dyn FnOnce(&Label, &Result<String>) + Send>;

/// A blocking unit of work destined for a worker thread.
pub struct Job {
    pub(crate) label: Label,
    pub(crate) task: BlockingTask,
}

impl Job {
    pub fn new<F, E>(label: Label, task: F) -> Self
    where
        F: FnOnce() -> core::result::Result<String, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            label,
            task: Box::new(move || task().map_err(Into::into)),
        }
    }

    pub const fn label(&self) -> &Label {
        &self.label
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

/// A message sent from the [`WorkerPool`](super::WorkerPool) to a worker
/// thread.
#[derive(Debug)]
pub(crate) enum WorkRequest {
    /// Run `job` and send its outcome on `response`.
    Run {
        job: Job,
        response: oneshot::Sender<Result<String>>,
    },

    /// Stop after acknowledging on `response`. Jobs queued ahead of this
    /// message still run.
    Shutdown { response: oneshot::Sender<()> },
}

pin_project! {
    /// Pending result of a submitted [`Job`].
    ///
    /// Resolves to the job's output, or to [`Error::WorkerFailure`] if it
    /// failed. Registered callbacks run exactly once: when the handle
    /// resolves, or from a detached task if the handle is dropped first.
    #[must_use = "job handles do nothing unless awaited or passed to `WorkerPool::wait_all`"]
    pub struct JobHandle {
        label: Label,
        // `None` once the outcome was received.
        rx: Option<oneshot::Receiver<Result<String>>>,
        callbacks: Vec<Callback>,
        notifiers: TaskTracker,
    }

    impl PinnedDrop for JobHandle {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if this.callbacks.is_empty() {
                return;
            }
            let Some(rx) = this.rx.take() else {
                return;
            };

            let label = this.label.clone();
            let callbacks = core::mem::take(this.callbacks);
            notify_detached(this.notifiers, label, rx, callbacks);
        }
    }
}

impl JobHandle {
    pub(crate) fn new(
        label: Label,
        rx: oneshot::Receiver<Result<String>>,
        notifiers: TaskTracker,
    ) -> Self {
        Self {
            label,
            rx: Some(rx),
            callbacks: Vec::new(),
            notifiers,
        }
    }

    pub const fn label(&self) -> &Label {
        &self.label
    }

    /// Registers a callback that receives the job's outcome.
    ///
    /// Callbacks fire in registration order when the handle resolves. Across
    /// different handles, firing order follows completion order, not
    /// submission order.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Label, &Result<String>) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("label", &self.label)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Future for JobHandle {
    type Output = Result<String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(Err(Error::ChannelError {
                context: format!("job '{}' polled after completion", this.label),
            }));
        };

        let outcome = received(ready!(Pin::new(rx).poll(cx)), this.label);
        *this.rx = None;

        for callback in this.callbacks.drain(..) {
            callback(this.label, &outcome);
        }

        Poll::Ready(outcome)
    }
}

fn received(
    outcome: core::result::Result<Result<String>, RecvError>,
    label: &Label,
) -> Result<String> {
    outcome.unwrap_or_else(|_| {
        Err(Error::ChannelError {
            context: format!("worker dropped job '{label}' without a result"),
        })
    })
}

/// Delivers the outcome of an abandoned handle to its callbacks.
///
/// Inside a runtime this is a task on `notifiers`. Dropped outside any
/// runtime, a short-lived thread waits for the worker instead.
fn notify_detached(
    notifiers: &TaskTracker,
    label: Label,
    rx: oneshot::Receiver<Result<String>>,
    callbacks: Vec<Callback>,
) {
    #[cfg(feature = "tracing")]
    tracing::debug!("Handle for job '{label}' dropped, detaching its callbacks");

    let fire = move |label: Label, outcome: Result<String>| {
        for callback in callbacks {
            callback(&label, &outcome);
        }
    };

    if let Ok(runtime) = Handle::try_current() {
        drop(notifiers.spawn_on(
            async move {
                let outcome = received(rx.await, &label);
                fire(label, outcome);
            },
            &runtime,
        ));
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("tally-notify".to_string())
        .spawn(move || {
            let outcome = received(rx.blocking_recv(), &label);
            fire(label, outcome);
        });
    if let Err(_e) = spawned {
        #[cfg(feature = "tracing")]
        tracing::error!("Failed to spawn a notifier thread: {_e}");
    }
}
