//! Offloading of blocking work to dedicated worker threads.
//!
//! - [`manager`] - the [`WorkerPool`] and its round-robin dispatch.
//! - [`request`] - [`Job`], [`JobHandle`] and the internal worker protocol.
//! - `worker` - the loop each worker thread runs.

pub mod manager;
pub mod request;
mod worker;

pub use manager::WorkerPool;
pub use request::{BoxError, Job, JobHandle};
