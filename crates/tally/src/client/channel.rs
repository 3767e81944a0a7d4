//! One request/reply round trip, exposed as a single awaitable value.
//!
//! [`RequestChannel`] implements [`IntoFuture`], so callers write
//! `RequestChannel::new(addr, label).await` and never see the connect, write,
//! flush, read and close steps it performs underneath.

use crate::{
    error::{Error, Result},
    protocol::{Label, decode_reply},
};
use core::{future::IntoFuture, time::Duration};
use futures::future::BoxFuture;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

/// Future returned by awaiting a [`RequestChannel`].
pub type RoundTrip = BoxFuture<'static, Result<i64>>;

/// A single pending request for the next value of a label.
///
/// Each instance performs exactly one round trip; connections are never
/// reused.
#[derive(Debug, Clone)]
#[must_use = "a request channel does nothing until awaited"]
pub struct RequestChannel {
    addr: String,
    label: Label,
    timeout: Option<Duration>,
}

impl RequestChannel {
    pub fn new(addr: impl Into<String>, label: Label) -> Self {
        Self {
            addr: addr.into(),
            label,
            timeout: None,
        }
    }

    /// Bounds the whole round trip. On expiry the request fails with
    /// [`Error::ConnectionFailure`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn label(&self) -> &Label {
        &self.label
    }

    /// Performs the round trip and resolves to the decoded reply.
    ///
    /// Equivalent to awaiting `self` directly.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionFailure`] if the connection cannot be opened, is
    ///   reset, closes without a reply, or the timeout elapses.
    /// - [`Error::ProtocolDecode`] if the reply is not an integer.
    pub fn request(self) -> RoundTrip {
        Box::pin(async move {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, exchange(&self.addr, &self.label))
                    .await
                    .map_err(|_| Error::ConnectionFailure {
                        context: format!(
                            "request for '{}' to {} timed out after {limit:?}",
                            self.label, self.addr
                        ),
                    })?,
                None => exchange(&self.addr, &self.label).await,
            }
        })
    }
}

impl IntoFuture for RequestChannel {
    type Output = Result<i64>;
    type IntoFuture = RoundTrip;

    fn into_future(self) -> Self::IntoFuture {
        self.request()
    }
}

async fn exchange(addr: &str, label: &Label) -> Result<i64> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::connection(format_args!("connect to {addr}"), e))?;

    #[cfg(feature = "tracing")]
    tracing::debug!("[client] {label} sending request");

    stream
        .write_all(label.as_bytes())
        .await
        .map_err(|e| Error::connection("write request", e))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::connection("flush request", e))?;

    // The server closes the connection right after its reply.
    let mut reply = Vec::with_capacity(4);
    stream
        .read_to_end(&mut reply)
        .await
        .map_err(|e| Error::connection("read reply", e))?;

    #[cfg(feature = "tracing")]
    tracing::debug!("[client] {label} received raw: {:?}", String::from_utf8_lossy(&reply));

    if reply.is_empty() {
        return Err(Error::ConnectionFailure {
            context: format!("{addr} closed the connection without a reply"),
        });
    }

    decode_reply(&reply)
}
