//! Scoped acquisition of a [`ResultStream`] with guaranteed teardown.
//!
//! A [`ScopedSession`] pairs a stream with a [`SessionLifecycle`]. Entering
//! runs the lifecycle's setup and yields an [`ActiveSession`]; leaving through
//! [`ActiveSession::exit`] consumes it, so teardown runs at most once per
//! successful enter.
//!
//! [`ScopedSession::run`] is the intended entry point. It enters, runs the
//! consuming block, and awaits teardown on every exit path: success, early
//! return, error, or panic (re-raised after teardown).
//!
//! An [`ActiveSession`] dropped before `exit` (for example because the future
//! driving `run` was cancelled) hands its teardown to the runtime as a
//! detached task. Attach a [`TaskTracker`] with
//! [`ScopedSession::with_tracker`] to be able to wait for those tasks.

use super::stream::ResultStream;
use crate::error::{Error, Result};
use core::{future::Future, panic::AssertUnwindSafe, time::Duration};
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Acquisition and release hooks around a session.
///
/// Lifecycles are `'static` so a cancelled session can still finish its
/// teardown on the runtime.
pub trait SessionLifecycle: Send + 'static {
    /// Runs before the stream is handed out. A failure aborts the enter and
    /// skips teardown.
    fn setup(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Runs exactly once after a successful setup.
    fn teardown(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Lifecycle that models acquisition and release as fixed latencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedDelay {
    pub setup: Duration,
    pub teardown: Duration,
}

impl FixedDelay {
    pub const fn new(setup: Duration, teardown: Duration) -> Self {
        Self { setup, teardown }
    }
}

impl SessionLifecycle for FixedDelay {
    async fn setup(&mut self) -> Result<()> {
        tokio::time::sleep(self.setup).await;
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        tokio::time::sleep(self.teardown).await;
        Ok(())
    }
}

/// A stream waiting to be acquired.
#[must_use = "a session does nothing until entered or run"]
pub struct ScopedSession<L = FixedDelay> {
    stream: ResultStream,
    lifecycle: L,
    tracker: Option<TaskTracker>,
}

impl ScopedSession<FixedDelay> {
    /// Creates a session whose setup and teardown are plain delays.
    pub const fn new(stream: ResultStream, lifecycle: FixedDelay) -> Self {
        Self {
            stream,
            lifecycle,
            tracker: None,
        }
    }
}

impl<L: SessionLifecycle> ScopedSession<L> {
    pub const fn with_lifecycle(stream: ResultStream, lifecycle: L) -> Self {
        Self {
            stream,
            lifecycle,
            tracker: None,
        }
    }

    /// Spawns teardowns of dropped sessions onto `tracker` instead of as
    /// untracked tasks.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Runs setup and hands out the stream.
    ///
    /// # Errors
    ///
    /// Propagates the setup error. Teardown does not run in that case.
    pub async fn enter(mut self) -> Result<ActiveSession<L>> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Entering session for '{}'", self.stream.label());

        self.lifecycle.setup().await?;
        Ok(ActiveSession {
            stream: self.stream,
            lifecycle: Some(self.lifecycle),
            tracker: self.tracker,
        })
    }

    /// Enters the session, runs `body` against the stream, and always tears
    /// down afterwards.
    ///
    /// If this future is dropped after setup finished, teardown still runs,
    /// detached on the runtime.
    ///
    /// # Errors
    ///
    /// - The setup error, if entering fails (`body` never runs).
    /// - The error returned by `body`.
    /// - [`Error::ResourceTeardown`] if teardown fails; when `body` failed as
    ///   well its error is kept in `original`.
    ///
    /// # Panics
    ///
    /// A panic inside `body` is caught, teardown runs, and the panic resumes.
    pub async fn run<F, T>(self, body: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut ResultStream) -> Result<T>,
    {
        let mut active = self.enter().await?;
        let outcome = AssertUnwindSafe(body(active.stream()))
            .catch_unwind()
            .await;
        let released = active.exit().await;

        match outcome {
            Err(panic) => {
                if let Err(_e) = released {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Session teardown failed while unwinding: {_e}");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Ok(value)) => released.map(|()| value),
            Ok(Err(original)) => match released {
                Ok(()) => Err(original),
                Err(teardown) => Err(attach_original(teardown, original)),
            },
        }
    }
}

/// A session between a successful enter and its exit.
///
/// `lifecycle` is taken by whichever of `exit` or `drop` runs first.
#[must_use = "an active session must be exited to run its teardown"]
pub struct ActiveSession<L: SessionLifecycle = FixedDelay> {
    stream: ResultStream,
    lifecycle: Option<L>,
    tracker: Option<TaskTracker>,
}

impl<L: SessionLifecycle> ActiveSession<L> {
    pub const fn stream(&mut self) -> &mut ResultStream {
        &mut self.stream
    }

    /// Runs teardown and releases the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceTeardown`] wrapping the lifecycle's error.
    pub async fn exit(mut self) -> Result<()> {
        let Some(mut lifecycle) = self.lifecycle.take() else {
            return Ok(());
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("Exiting session for '{}'", self.stream.label());

        lifecycle.teardown().await.map_err(as_teardown_error)
    }
}

impl<L: SessionLifecycle> Drop for ActiveSession<L> {
    fn drop(&mut self) {
        let Some(mut lifecycle) = self.lifecycle.take() else {
            return;
        };

        let Ok(runtime) = Handle::try_current() else {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Session for '{}' dropped outside a runtime; teardown skipped",
                self.stream.label()
            );
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Session for '{}' dropped before exit, detaching teardown",
            self.stream.label()
        );

        let teardown = async move {
            if let Err(_e) = lifecycle.teardown().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Detached session teardown failed: {_e}");
            }
        };
        match &self.tracker {
            Some(tracker) => drop(tracker.spawn_on(teardown, &runtime)),
            None => drop(runtime.spawn(teardown)),
        }
    }
}

fn as_teardown_error(err: Error) -> Error {
    match err {
        Error::ResourceTeardown { .. } => err,
        other => Error::ResourceTeardown {
            reason: other.to_string(),
            original: None,
        },
    }
}

fn attach_original(teardown: Error, original: Error) -> Error {
    match as_teardown_error(teardown) {
        Error::ResourceTeardown { reason, .. } => Error::ResourceTeardown {
            reason,
            original: Some(Box::new(original)),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Label;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[derive(Clone, Default)]
    struct Counting {
        setups: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
        fail_setup: bool,
        fail_teardown: bool,
    }

    impl SessionLifecycle for Counting {
        async fn setup(&mut self) -> Result<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            if self.fail_setup {
                return Err(Error::ChannelError {
                    context: "setup refused".to_string(),
                });
            }
            Ok(())
        }

        async fn teardown(&mut self) -> Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_teardown {
                return Err(Error::ChannelError {
                    context: "teardown refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn unreachable_stream() -> ResultStream {
        // Never polled by these tests.
        ResultStream::new("127.0.0.1:9", Label::new("unit").unwrap())
    }

    #[tokio::test]
    async fn teardown_runs_once_on_success() {
        let lifecycle = Counting::default();
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());

        let value = session.run(async |_stream| Ok(42)).await.unwrap();

        assert_eq!(value, 42);
        assert_eq!(lifecycle.setups.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_runs_once_when_body_fails() {
        let lifecycle = Counting::default();
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());

        let err = session
            .run(async |_stream| -> Result<()> {
                Err(Error::ProtocolDecode {
                    context: "boom".to_string(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProtocolDecode { .. }));
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_runs_once_when_body_panics() {
        let lifecycle = Counting::default();
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());

        let caught = AssertUnwindSafe(session.run(async |_stream| -> Result<()> {
            panic!("consumer blew up");
        }))
        .catch_unwind()
        .await;

        assert!(caught.is_err());
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_setup_skips_body_and_teardown() {
        let lifecycle = Counting {
            fail_setup: true,
            ..Counting::default()
        };
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        let result = session
            .run(async |_stream| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::ChannelError { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn teardown_failure_keeps_the_original_error() {
        let lifecycle = Counting {
            fail_teardown: true,
            ..Counting::default()
        };
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());

        let err = session
            .run(async |_stream| -> Result<()> {
                Err(Error::ConnectionFailure {
                    context: "reset".to_string(),
                })
            })
            .await
            .unwrap_err();

        match err {
            Error::ResourceTeardown {
                reason,
                original: Some(original),
            } => {
                assert!(reason.contains("teardown refused"));
                assert!(matches!(*original, Error::ConnectionFailure { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn teardown_failure_after_success_is_reported() {
        let lifecycle = Counting {
            fail_teardown: true,
            ..Counting::default()
        };
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle);

        let err = session.run(async |_stream| Ok(())).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ResourceTeardown { original: None, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_costs_setup_plus_teardown() {
        let delays = FixedDelay::new(Duration::from_secs(3), Duration::from_secs(3));
        let session = ScopedSession::new(unreachable_stream(), delays);
        let start = tokio::time::Instant::now();

        session.run(async |_stream| Ok(())).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn explicit_enter_and_exit() {
        let lifecycle = Counting::default();
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());

        let mut active = session.enter().await.unwrap();
        assert!(!active.stream().is_finished());
        active.exit().await.unwrap();

        assert_eq!(lifecycle.setups.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_run_still_tears_down_once() {
        let lifecycle = Counting::default();
        let tracker = TaskTracker::new();
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone())
            .with_tracker(tracker.clone());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            session.run(async |_stream| -> Result<()> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        )
        .await;
        assert!(cancelled.is_err());

        tracker.close();
        tracker.wait().await;

        assert_eq!(lifecycle.setups.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_active_session_tears_down_without_a_tracker() {
        let lifecycle = Counting::default();
        let session = ScopedSession::with_lifecycle(unreachable_stream(), lifecycle.clone());

        drop(session.enter().await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(lifecycle.teardowns.load(Ordering::SeqCst), 1);
    }
}
