//! Shared plumbing for the `tally-server` and `tally-client` binaries.

pub mod config;
pub mod signal;
pub mod telemetry;
