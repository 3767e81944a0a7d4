//! TCP front end of the counter service.
//!
//! This module defines [`CounterService`], which accepts connections and
//! answers each with exactly one reply from the shared [`CounterTable`].
//! Connection handlers run as independent tasks; a fault in one of them
//! closes only that connection and never leaves the table locked.
//!
//! ## Connection lifecycle
//!
//! `AWAIT_REQUEST -> PROCESS -> RESPOND -> CLOSED`
//!
//! - Read at most `max_request_bytes` in a single read, optionally bounded by
//!   `read_timeout`.
//! - Decode the label and take one reply from the table.
//! - Write and flush the reply, then close.
//!
//! ## Shutdown
//!
//! Cancelling the service's token stops the accept loop. In-flight handlers
//! are tracked and given up to `shutdown_timeout` to finish.

use super::table::CounterTable;
use crate::{
    config::ServiceConfig,
    error::{Error, Result},
    protocol::{Label, MAX_LABEL_BYTES, Reply},
};
use core::pin::pin;
use futures::{Stream, StreamExt};
use std::{io, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    time::timeout,
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Per-label counting service.
///
/// Cloning is cheap and every clone shares the same table, shutdown token and
/// connection tracker.
#[derive(Clone, Debug)]
pub struct CounterService {
    table: Arc<CounterTable>,
    config: ServiceConfig,
    shutdown_token: CancellationToken,
    connections: TaskTracker,
}

impl CounterService {
    /// Creates a service with an empty table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_request_bytes` is zero or
    /// larger than [`MAX_LABEL_BYTES`].
    pub fn new(config: ServiceConfig) -> Result<Self> {
        if config.max_request_bytes == 0 || config.max_request_bytes > MAX_LABEL_BYTES {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "max_request_bytes must be within 1..={MAX_LABEL_BYTES}, got {}",
                    config.max_request_bytes
                ),
            });
        }

        Ok(Self {
            table: Arc::new(CounterTable::new(config.reset_threshold)),
            config,
            shutdown_token: CancellationToken::new(),
            connections: TaskTracker::new(),
        })
    }

    pub const fn table(&self) -> &Arc<CounterTable> {
        &self.table
    }

    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Token that stops the accept loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Stops accepting connections. [`serve`](Self::serve) returns once
    /// in-flight handlers have drained or the shutdown timeout elapsed.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Serves connections from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) {
        self.serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    }

    /// Serves every connection yielded by `incoming` until it ends or
    /// shutdown is requested.
    pub async fn serve_with_incoming<I, IO>(&self, incoming: I)
    where
        I: Stream<Item = io::Result<IO>>,
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut incoming = pin!(incoming);

        loop {
            let next = tokio::select! {
                () = self.shutdown_token.cancelled() => break,
                next = incoming.next() => next,
            };

            match next {
                Some(Ok(io)) => {
                    let table = Arc::clone(&self.table);
                    let config = self.config.clone();
                    self.connections.spawn(async move {
                        if let Err(_e) = handle_connection(io, &table, &config).await {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("[server] connection dropped: {_e}");
                        }
                    });
                }
                Some(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("[server] failed to accept connection: {_e}");
                }
                None => break,
            }
        }

        self.drain().await;
    }

    async fn drain(&self) {
        self.connections.close();

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight connections ({} active)",
            self.connections.len()
        );

        match timeout(self.config.shutdown_timeout, self.connections.wait()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight connections drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} connections still active)",
                    self.connections.len()
                );
            }
        }
    }
}

/// Runs one connection through its full lifecycle and returns the reply
/// that was sent.
///
/// The table lock is taken and released inside the PROCESS step; it is never
/// held while reading or writing.
///
/// # Errors
///
/// - [`Error::ConnectionFailure`] if the read fails or times out, or the
///   reply cannot be written. A failed write happens after the count was
///   taken.
/// - [`Error::InvalidLabel`] if the request is empty or not UTF-8. The table
///   is left untouched and no reply is sent.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub async fn handle_connection<IO>(
    mut io: IO,
    table: &CounterTable,
    config: &ServiceConfig,
) -> Result<Reply>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    // AWAIT_REQUEST
    let mut buf = vec![0_u8; config.max_request_bytes];
    let read = match config.read_timeout {
        Some(limit) => timeout(limit, io.read(&mut buf))
            .await
            .map_err(|_| Error::ConnectionFailure {
                context: format!("no request received within {limit:?}"),
            })?,
        None => io.read(&mut buf).await,
    }
    .map_err(|e| Error::connection("read request", e))?;

    // PROCESS
    let label = Label::from_wire(&buf[..read])?;
    let reply = table.next_reply(&label);

    #[cfg(feature = "tracing")]
    tracing::debug!("[server] {label} -> {reply}");

    // RESPOND
    io.write_all(&reply.encode())
        .await
        .map_err(|e| Error::connection("write reply", e))?;
    io.flush()
        .await
        .map_err(|e| Error::connection("flush reply", e))?;

    // CLOSED
    if let Err(_e) = io.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::debug!("[server] close after reply failed: {_e}");
    }

    Ok(reply)
}
