//! Command-line and environment configuration for both binaries.
//!
//! Every option can be given as a flag or through the environment variable
//! named on it; a `.env` file in the working directory is loaded first.

use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use tally::{
    config::{DEFAULT_LABEL, DispatchMode, OrchestratorConfig, PoolConfig, ServiceConfig},
    protocol::{DEFAULT_RESET_THRESHOLD, DEFAULT_SERVER_ADDR, Label, MAX_LABEL_BYTES},
};

/// Runtime configuration for the `tally-server` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tally-server",
    version,
    about = "A TCP service answering each label with its running count"
)]
pub struct ServerCliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Most bytes read from a connection for its request. A label longer
    /// than this is truncated before decoding.
    ///
    /// Environment variable: `MAX_REQUEST_BYTES`
    #[arg(long, env = "MAX_REQUEST_BYTES", default_value_t = MAX_LABEL_BYTES)]
    pub max_request_bytes: usize,

    /// Highest count served before a label is answered with `-1` and reset.
    ///
    /// Environment variable: `RESET_THRESHOLD`
    #[arg(long, env = "RESET_THRESHOLD", default_value_t = DEFAULT_RESET_THRESHOLD)]
    pub reset_threshold: u32,

    /// How long a connection may take to send its request, in milliseconds.
    /// Zero waits forever.
    ///
    /// Environment variable: `READ_TIMEOUT_MS`
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = 10_000)]
    pub read_timeout_ms: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub service: ServiceConfig,
}

impl TryFrom<ServerCliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServerCliArgs) -> Result<Self, Self::Error> {
        if args.max_request_bytes == 0 {
            bail!("MAX_REQUEST_BYTES must be greater than 0");
        }

        if args.max_request_bytes > MAX_LABEL_BYTES {
            bail!(
                "MAX_REQUEST_BYTES ({}) exceeds the label limit (max = {})",
                args.max_request_bytes,
                MAX_LABEL_BYTES
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            service: ServiceConfig {
                max_request_bytes: args.max_request_bytes,
                reset_threshold: args.reset_threshold,
                read_timeout: millis_or_none(args.read_timeout_ms),
                shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            },
        })
    }
}

/// Runtime configuration for the `tally-client` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tally-client",
    version,
    about = "Drains a label's count stream and fans the values out to blocking workers"
)]
pub struct ClientCliArgs {
    /// Address of the counter service.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Label whose stream is drained.
    ///
    /// Environment variable: `LABEL`
    #[arg(long, env = "LABEL", default_value_t = String::from(DEFAULT_LABEL))]
    pub label: String,

    /// Number of worker threads running the blocking jobs.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = num_cpus::get())]
    pub num_workers: usize,

    /// Cost of entering the session, in milliseconds.
    ///
    /// Environment variable: `SETUP_DELAY_MS`
    #[arg(long, env = "SETUP_DELAY_MS", default_value_t = 3_000)]
    pub setup_delay_ms: u64,

    /// Cost of leaving the session, in milliseconds.
    ///
    /// Environment variable: `TEARDOWN_DELAY_MS`
    #[arg(long, env = "TEARDOWN_DELAY_MS", default_value_t = 3_000)]
    pub teardown_delay_ms: u64,

    /// How long each blocking job runs, in milliseconds.
    ///
    /// Environment variable: `JOB_DELAY_MS`
    #[arg(long, env = "JOB_DELAY_MS", default_value_t = 1_000)]
    pub job_delay_ms: u64,

    /// Deadline for one round trip, in milliseconds. Zero waits forever.
    ///
    /// Environment variable: `IO_TIMEOUT_MS`
    #[arg(long, env = "IO_TIMEOUT_MS", default_value_t = 0)]
    pub io_timeout_ms: u64,

    /// Submit each value as soon as it arrives instead of after the session
    /// is released.
    #[arg(long, default_value_t = false)]
    pub pipelined: bool,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub orchestrator: OrchestratorConfig,
}

impl TryFrom<ClientCliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: ClientCliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        let label = Label::new(args.label).context("LABEL is invalid")?;

        Ok(Self {
            pool: PoolConfig {
                num_workers: args.num_workers,
                ..PoolConfig::default()
            },
            orchestrator: OrchestratorConfig {
                server_addr: args.server_addr,
                label,
                setup_delay: Duration::from_millis(args.setup_delay_ms),
                teardown_delay: Duration::from_millis(args.teardown_delay_ms),
                job_delay: Duration::from_millis(args.job_delay_ms),
                io_timeout: millis_or_none(args.io_timeout_ms),
                dispatch: if args.pipelined {
                    DispatchMode::Pipelined
                } else {
                    DispatchMode::AfterDrain
                },
            },
        })
    }
}

const fn millis_or_none(ms: u64) -> Option<Duration> {
    match ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_stock_deployment() {
        let args = ServerCliArgs::try_parse_from(["tally-server"]).unwrap();
        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:8888");
        assert_eq!(config.service.max_request_bytes, 100);
        assert_eq!(config.service.reset_threshold, 10);
        assert_eq!(config.service.read_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn server_rejects_oversized_byte_budget() {
        let args =
            ServerCliArgs::try_parse_from(["tally-server", "--max-request-bytes", "101"]).unwrap();
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test]
    fn zero_timeout_means_none() {
        let args =
            ServerCliArgs::try_parse_from(["tally-server", "--read-timeout-ms", "0"]).unwrap();
        let config = ServerConfig::try_from(args).unwrap();
        assert_eq!(config.service.read_timeout, None);
    }

    #[test]
    fn client_flags_map_onto_orchestrator() {
        let args = ClientCliArgs::try_parse_from([
            "tally-client",
            "--label",
            "batch",
            "--num-workers",
            "2",
            "--setup-delay-ms",
            "0",
            "--io-timeout-ms",
            "250",
            "--pipelined",
        ])
        .unwrap();
        let config = ClientConfig::try_from(args).unwrap();
        assert_eq!(config.pool.num_workers, 2);
        assert_eq!(config.orchestrator.label.as_str(), "batch");
        assert_eq!(config.orchestrator.setup_delay, Duration::ZERO);
        assert_eq!(
            config.orchestrator.io_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.orchestrator.dispatch, DispatchMode::Pipelined);
    }

    #[test]
    fn client_rejects_zero_workers_and_empty_label() {
        let args = ClientCliArgs::try_parse_from(["tally-client", "--num-workers", "0"]).unwrap();
        assert!(ClientConfig::try_from(args).is_err());

        let args = ClientCliArgs::try_parse_from(["tally-client", "--label", ""]).unwrap();
        assert!(ClientConfig::try_from(args).is_err());
    }
}
