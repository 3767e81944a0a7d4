//! # `tally`: per-label counters over TCP, bridged onto blocking workers
//!
//! `tally` pairs a small stateful TCP service with an async client that shows
//! how cooperative, single-threaded code hands blocking work to OS threads
//! and gets the results back on its own turn.
//!
//! ## Highlights
//!
//! - **Awaitable round trips**: [`RequestChannel`] implements `IntoFuture`;
//!   awaiting it connects, sends a label, reads one integer and closes.
//! - **Sentinel-terminated streams**: [`ResultStream`] yields counts until
//!   the server answers `-1`, and never re-enters the network afterwards.
//! - **Guaranteed teardown**: [`ScopedSession::run`] releases the session on
//!   every exit path of the consuming block.
//! - **Thread-backed worker pool**: [`WorkerPool`] runs blocking jobs on
//!   dedicated threads; [`JobHandle`]s fire completion callbacks exactly once.
//! - **Serialized shared state**: [`CounterService`] answers every connection
//!   from one [`CounterTable`] guarded by a single lock.
//!
//! ## Wire protocol
//!
//! One request per connection. The client sends a UTF-8 label of at most
//! 100 bytes; the server replies with the label's pre-increment count as
//! ASCII decimal, or `-1` once the count passed the threshold (resetting it),
//! then closes.
//!
//! ## Module Overview
//!
//! - [`protocol`] - labels, replies and wire encoding.
//! - [`client`] - request channel, result stream and scoped session.
//! - [`pool`] - worker pool, jobs and job handles.
//! - [`orchestrator`] - session-then-dispatch driver.
//! - [`server`] - counter table and TCP service.
//! - [`config`] - runtime settings with defaults.
//! - [`error`] - the crate-wide [`Error`] type.

pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod protocol;
pub mod server;

pub use client::{FixedDelay, RequestChannel, ResultStream, ScopedSession, SessionLifecycle};
pub use config::{DispatchMode, OrchestratorConfig, PoolConfig, ServiceConfig};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunReport};
pub use pool::{Job, JobHandle, WorkerPool};
pub use protocol::{Label, Reply, SENTINEL};
pub use server::{CounterService, CounterTable};
