//! Event names and the reserved lifecycle events.

use std::borrow::Borrow;
use std::fmt;

/// Dispatched when the transport opens. No arguments.
pub const OPEN: &str = "open";
/// Dispatched when the transport closes, before [`DISCONNECT`]. Args: `[code, reason]`.
pub const CLOSE: &str = "close";
/// Dispatched when the transport closes, after [`CLOSE`]. Args: `[code, reason]`.
pub const DISCONNECT: &str = "disconnect";
/// Dispatched for malformed inbound data and transport faults. Args: `[message]`.
pub const ERROR: &str = "error";
/// Sent by a client once its transport opens.
pub const IM_CONNECTED: &str = "imConnected";
/// Sent by a server in answer to [`IM_CONNECTED`].
pub const CONNECT: &str = "connect";
/// Server-level event carrying each accepted peer.
pub const CONNECTION: &str = "connection";

const MAX_EVENT_NAME_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventNameError {
    #[error("event name cannot be empty")]
    Empty,
    #[error("event name cannot exceed {max} bytes (got {actual})")]
    TooLong { max: usize, actual: usize },
}

/// Validated registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventName(String);

impl EventName {
    /// Validate an event name.
    ///
    /// # Errors
    ///
    /// Returns [`EventNameError`] for empty or oversized names.
    pub fn new(name: impl Into<String>) -> Result<Self, EventNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventNameError::Empty);
        }
        if name.len() > MAX_EVENT_NAME_LEN {
            return Err(EventNameError::TooLong { max: MAX_EVENT_NAME_LEN, actual: name.len() });
        }
        Ok(Self(name))
    }

    /// Key for one of the reserved names above, which are known to be valid.
    pub(crate) fn reserved(name: &'static str) -> Self {
        Self(name.to_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EventName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for EventName {
    type Error = EventNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
