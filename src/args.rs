//! Argument model for emitted and received events.
//!
//! DESIGN
//! ======
//! Outbound arguments are [`Payload`]s: plain JSON or a local [`Callback`].
//! Inbound arguments are [`Arg`]s: plain JSON or a [`RemoteCallback`] proxy
//! synthesized by the connection for each callback slot of the frame. The
//! tagged variants replace any in-band marker, so user data can never be
//! mistaken for a function.

use std::fmt;
use std::sync::Weak;

use frames::CallbackId;
use serde_json::Value;

use crate::connection::{Connection, Inner};
use crate::correlator::CallbackError;

// =============================================================================
// OUTBOUND
// =============================================================================

/// One-shot local function sent to the peer by reference.
///
/// Invoked at most once: with the peer's reply arguments, or with a
/// [`CallbackError`] when the reply can no longer arrive.
pub struct Callback(Box<dyn FnOnce(Result<Args, CallbackError>) + Send>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<Args, CallbackError>) + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub(crate) fn complete(self, result: Result<Args, CallbackError>) {
        (self.0)(result);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// An argument passed to `emit`.
#[derive(Debug)]
pub enum Payload {
    Value(Value),
    Callback(Callback),
}

impl Payload {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Result<Args, CallbackError>) + Send + 'static,
    {
        Self::Callback(Callback::new(f))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Callback> for Payload {
    fn from(callback: Callback) -> Self {
        Self::Callback(callback)
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Local proxy for a function that lives on the peer.
///
/// Calling it sends a correlation reply carrying the call arguments back to
/// the peer, which resolves its original callback. The proxy holds only a
/// weak reference to the connection.
#[derive(Clone)]
pub struct RemoteCallback {
    id: CallbackId,
    event: String,
    index: usize,
    connection: Weak<Inner>,
}

impl RemoteCallback {
    pub(crate) fn new(id: CallbackId, event: &str, index: usize, connection: Weak<Inner>) -> Self {
        Self { id, event: event.to_owned(), index, connection }
    }

    /// Correlation id assigned by the peer.
    #[must_use]
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Event whose arguments carried this callback.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Position of this callback within the event's arguments.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Invoke the peer's function with `args`.
    ///
    /// Returns `false` when the reply could not be queued (connection gone or
    /// not open). The peer ignores every reply after the first.
    pub fn call(&self, args: impl IntoIterator<Item = Payload>) -> bool {
        let Some(inner) = self.connection.upgrade() else {
            return false;
        };
        let name = frames::correlation_event_name(&self.event, self.index);
        Connection::from_inner(inner).send_reply(self.id, &name, args)
    }
}

impl fmt::Debug for RemoteCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCallback")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// An argument received with an event.
#[derive(Clone, Debug)]
pub enum Arg {
    Value(Value),
    Callback(RemoteCallback),
}

/// Positional arguments delivered to listeners and callbacks.
#[derive(Clone, Debug, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    #[must_use]
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }

    /// JSON value at `index`; `None` for callbacks and missing positions.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.0.get(index) {
            Some(Arg::Value(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn str(&self, index: usize) -> Option<&str> {
        self.value(index).and_then(Value::as_str)
    }

    #[must_use]
    pub fn i64(&self, index: usize) -> Option<i64> {
        self.value(index).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn f64(&self, index: usize) -> Option<f64> {
        self.value(index).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn callback(&self, index: usize) -> Option<&RemoteCallback> {
        match self.0.get(index) {
            Some(Arg::Callback(cb)) => Some(cb),
            _ => None,
        }
    }

    /// All arguments as JSON, with callbacks rendered as `null`.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.0
            .iter()
            .map(|arg| match arg {
                Arg::Value(v) => v.clone(),
                Arg::Callback(_) => Value::Null,
            })
            .collect()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Arg> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into_iter().map(Arg::Value).collect())
    }
}

#[cfg(test)]
#[path = "args_test.rs"]
mod tests;
