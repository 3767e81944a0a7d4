//! Error types for the counter service, its client and the worker pool.
//!
//! This module defines the central [`Error`] enum, which captures every
//! reportable failure across the crate. Errors are never retried internally;
//! they surface to whoever drove the failing operation.
//!
//! ## Error Cases
//! - `ConnectionFailure`: The transport could not be established, was reset,
//!   or timed out mid-exchange.
//! - `ProtocolDecode`: The reply bytes did not parse as a decimal integer.
//! - `WorkerFailure`: A blocking job failed or panicked on its worker thread.
//! - `JobsFailed`: At least one job in a batch failed.
//! - `ResourceTeardown`: Releasing a scoped session failed. If the consuming
//!   block failed as well, its error is kept in `original`.
//! - `InvalidLabel`: A label was empty or exceeded the request byte budget.
//! - `InvalidConfig`: A configuration value is out of range.
//! - `ChannelError`: An internal channel closed unexpectedly.
//! - `ServiceShutdown`: Work was submitted after shutdown began.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the crate.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Connect, write, read or close failed, or the round trip timed out.
    #[error("Connection failure: {context}")]
    ConnectionFailure { context: String },

    /// The server replied with bytes that are not a decimal integer.
    #[error("Protocol decode failure: {context}")]
    ProtocolDecode { context: String },

    /// A blocking job returned an error or panicked.
    #[error("Job '{label}' failed: {reason}")]
    WorkerFailure { label: String, reason: String },

    /// One or more jobs of a batch failed. `first` is the earliest failure in
    /// submission order.
    #[error("{failed} of {total} jobs failed, first: {first}")]
    JobsFailed {
        failed: usize,
        total: usize,
        #[source]
        first: Box<Error>,
    },

    /// Session teardown failed. `original` holds the consuming block's error,
    /// if it failed too.
    #[error("Session teardown failed: {reason}")]
    ResourceTeardown {
        reason: String,
        #[source]
        original: Option<Box<Error>>,
    },

    /// The label cannot be sent as a single request.
    #[error("Invalid label: {reason}")]
    InvalidLabel { reason: String },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The component is shutting down and refuses new work.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub(crate) fn connection(context: impl core::fmt::Display, err: std::io::Error) -> Self {
        Self::ConnectionFailure {
            context: format!("{context}: {err}"),
        }
    }
}
