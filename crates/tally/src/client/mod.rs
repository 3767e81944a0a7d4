//! Client side of the counter protocol.
//!
//! - [`channel`] - [`RequestChannel`], one awaitable round trip.
//! - [`stream`] - [`ResultStream`], counts for a label until the sentinel.
//! - [`session`] - [`ScopedSession`], setup and guaranteed teardown around a
//!   stream.

pub mod channel;
pub mod session;
pub mod stream;

pub use channel::{RequestChannel, RoundTrip};
pub use session::{ActiveSession, FixedDelay, ScopedSession, SessionLifecycle};
pub use stream::ResultStream;
