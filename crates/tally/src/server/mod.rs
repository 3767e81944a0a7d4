//! Server side of the counter protocol.
//!
//! - [`table`] - the shared, lock-guarded [`CounterTable`].
//! - [`handler`] - the [`CounterService`] accept loop and the
//!   per-connection handler.

pub mod handler;
pub mod table;

pub use handler::{CounterService, handle_connection};
pub use table::CounterTable;
