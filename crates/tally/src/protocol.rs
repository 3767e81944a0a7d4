//! Wire format shared by the counter service and its client.
//!
//! Every exchange is one request per connection with no framing beyond the
//! connection itself:
//!
//! - Client to server: the UTF-8 bytes of a [`Label`], at most
//!   [`MAX_LABEL_BYTES`].
//! - Server to client: an ASCII decimal integer. Either the pre-increment
//!   count (`"0"` to `"10"` with the default threshold) or [`SENTINEL`].
//!
//! The server closes the connection right after writing its reply, so the
//! client reads until end of stream.

use crate::error::{Error, Result};
use core::{borrow::Borrow, fmt, str::FromStr};
use std::sync::Arc;

/// Upper bound on the bytes a single request may carry.
pub const MAX_LABEL_BYTES: usize = 100;

/// Reply value meaning "threshold exceeded, counter reset".
pub const SENTINEL: i64 = -1;

/// Highest count served before the next request for the label is answered
/// with [`SENTINEL`].
pub const DEFAULT_RESET_THRESHOLD: u32 = 10;

/// Loopback address the server binds to unless configured otherwise.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8888";

/// Client-chosen name for a counter. Used both as the request payload and as
/// the server-side table key.
///
/// Cloning is cheap; the string is reference counted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(Arc<str>);

impl Label {
    /// Creates a label that fits in one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLabel`] if the label is empty or longer than
    /// [`MAX_LABEL_BYTES`]. An empty write would leave both peers waiting on
    /// each other.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(Error::InvalidLabel {
                reason: "label must not be empty".to_string(),
            });
        }
        if label.len() > MAX_LABEL_BYTES {
            return Err(Error::InvalidLabel {
                reason: format!(
                    "label is {} bytes, at most {MAX_LABEL_BYTES} fit in one request",
                    label.len()
                ),
            });
        }
        Ok(Self(label.into()))
    }

    /// Decodes a label from the bytes of one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLabel`] for an empty payload or one that is not
    /// valid UTF-8.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let label = core::str::from_utf8(bytes).map_err(|e| Error::InvalidLabel {
            reason: format!("request is not UTF-8: {e}"),
        })?;
        if label.is_empty() {
            return Err(Error::InvalidLabel {
                reason: "empty request".to_string(),
            });
        }
        Ok(Self(label.into()))
    }

    /// Builds a label from a literal known to be valid.
    pub(crate) fn from_static(label: &'static str) -> Self {
        debug_assert!(!label.is_empty() && label.len() <= MAX_LABEL_BYTES);
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets tables keyed by `Label` be queried with a plain `&str`.
impl Borrow<str> for Label {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Label {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for Label {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// The server's answer to one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    /// The label's count before this request incremented it.
    Count(u32),
    /// The count exceeded the threshold and was reset to zero.
    Sentinel,
}

impl Reply {
    /// The integer carried on the wire.
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Count(count) => count as i64,
            Self::Sentinel => SENTINEL,
        }
    }

    pub fn encode(self) -> Vec<u8> {
        self.as_i64().to_string().into_bytes()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Parses the bytes of one reply as a decimal integer.
///
/// Surrounding ASCII whitespace is ignored.
///
/// # Errors
///
/// Returns [`Error::ProtocolDecode`] if the bytes are not UTF-8 or not an
/// integer.
pub fn decode_reply(bytes: &[u8]) -> Result<i64> {
    let text = core::str::from_utf8(bytes).map_err(|e| Error::ProtocolDecode {
        context: format!("reply is not UTF-8: {e}"),
    })?;
    text.trim().parse::<i64>().map_err(|e| Error::ProtocolDecode {
        context: format!("reply {text:?} is not an integer: {e}"),
    })
}
