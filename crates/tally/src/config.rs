//! Runtime configuration for the counter service, the worker pool and the
//! orchestrator.
//!
//! These are plain structs with defaults matching the stock deployment: the
//! service on `127.0.0.1:8888` and three second session costs. The binaries in
//! `tally-server` build them from CLI arguments and environment variables;
//! tests construct them directly.

use crate::protocol::{DEFAULT_RESET_THRESHOLD, DEFAULT_SERVER_ADDR, Label, MAX_LABEL_BYTES};
use core::time::Duration;

/// Label the orchestrator drains when none is configured.
pub const DEFAULT_LABEL: &str = "job";

/// Settings for [`CounterService`](crate::server::CounterService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Most bytes read from a connection for its single request.
    pub max_request_bytes: usize,
    /// Highest count served before the label is answered with the sentinel
    /// and reset.
    pub reset_threshold: u32,
    /// How long a handler waits for the request bytes. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// How long shutdown waits for in-flight connections to finish.
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: MAX_LABEL_BYTES,
            reset_threshold: DEFAULT_RESET_THRESHOLD,
            read_timeout: Some(Duration::from_secs(10)),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Settings for [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads. Must be greater than zero.
    pub num_workers: usize,
    /// How long shutdown waits for each worker to acknowledge.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism().map_or(1, usize::from),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// When the orchestrator hands collected values to the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Drain the whole stream, release the session, then submit every job.
    #[default]
    AfterDrain,
    /// Submit one job as soon as each value arrives.
    Pipelined,
}

/// Settings for [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Address of the counter service.
    pub server_addr: String,
    /// Label whose stream is drained.
    pub label: Label,
    /// Fixed cost of entering the session.
    pub setup_delay: Duration,
    /// Fixed cost of leaving the session.
    pub teardown_delay: Duration,
    /// How long each blocking job sleeps before reporting.
    pub job_delay: Duration,
    /// Deadline for a single round trip. `None` waits forever.
    pub io_timeout: Option<Duration>,
    pub dispatch: DispatchMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            label: Label::from_static(DEFAULT_LABEL),
            setup_delay: Duration::from_secs(3),
            teardown_delay: Duration::from_secs(3),
            job_delay: Duration::from_secs(1),
            io_timeout: None,
            dispatch: DispatchMode::AfterDrain,
        }
    }
}
