//! Lazy, sentinel-terminated sequence of counts for one label.
//!
//! A [`ResultStream`] issues one [`RequestChannel`] round trip per element
//! and only while it is being polled; nothing is fetched in the background.
//! The first negative reply ends the stream without being yielded.

use super::channel::{RequestChannel, RoundTrip};
use crate::{error::Result, protocol::Label};
use core::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use futures::{Stream, future::poll_fn, stream::FusedStream};

/// Forward-only stream of the counts served for a fixed label.
///
/// Values arrive in the order the server answered. Once the sentinel is
/// observed, or a round trip fails, the stream is finished for good and later
/// polls return end-of-stream without touching the network.
#[must_use = "streams do nothing unless polled"]
pub struct ResultStream {
    addr: String,
    label: Label,
    timeout: Option<Duration>,
    inflight: Option<RoundTrip>,
    finished: bool,
}

impl ResultStream {
    pub fn new(addr: impl Into<String>, label: Label) -> Self {
        Self {
            addr: addr.into(),
            label,
            timeout: None,
            inflight: None,
            finished: false,
        }
    }

    /// Applies a deadline to every round trip the stream performs.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn label(&self) -> &Label {
        &self.label
    }

    /// Whether the stream has ended, normally or through an error.
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetches the next count, or `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns the round trip's error. The error is reported once; the stream
    /// is finished afterwards.
    pub async fn next(&mut self) -> Result<Option<i64>> {
        poll_fn(|cx| Pin::new(&mut *self).poll_next(cx))
            .await
            .transpose()
    }

    /// Consumes the rest of the stream into a list, in arrival order.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first round trip error.
    pub async fn drain(&mut self) -> Result<Vec<i64>> {
        let mut values = Vec::new();
        while let Some(value) = self.next().await? {
            values.push(value);
        }
        Ok(values)
    }

    fn channel(&self) -> RequestChannel {
        RequestChannel::new(self.addr.clone(), self.label.clone()).with_timeout(self.timeout)
    }
}

impl Stream for ResultStream {
    type Item = Result<i64>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let mut inflight = match this.inflight.take() {
            Some(round_trip) => round_trip,
            None => this.channel().request(),
        };

        match inflight.as_mut().poll(cx) {
            Poll::Pending => {
                this.inflight = Some(inflight);
                Poll::Pending
            }
            Poll::Ready(Ok(value)) if value < 0 => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Stream for '{}' reached the sentinel", this.label);
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Ok(value)) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Stream for '{}' ended abnormally: {e}", this.label);
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

impl FusedStream for ResultStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}
