//! One endpoint of the event protocol over one transport.
//!
//! ARCHITECTURE
//! ============
//! A `Connection` owns a listener registry, a callback correlator and the
//! sending half of an outbound queue. It never touches a socket itself: a
//! transport driver (see `server` and `client`) feeds [`TransportEvent`]s in
//! through [`Connection::handle_transport_event`] and drains [`Outbound`]
//! messages onto the wire. Inbound events are handled one at a time in
//! arrival order on the driver's task.
//!
//! LIFECYCLE
//! =========
//! `Connecting → Open → Closed`.
//! - `Opened` moves to `Open` and dispatches `open`.
//! - `Closed` moves to `Closed`, fails pending callbacks, dispatches `close`
//!   then `disconnect`, and clears every listener.
//! - Malformed frames and transport faults dispatch `error` and leave the
//!   state unchanged.
//!
//! Emitting while not `Open` drops the event and returns `false`. The
//! outbound queue is bounded: when a slow peer lets it fill up, further
//! emits are dropped the same way. One slot is always left for a close
//! request.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use frames::{CallbackId, Frame, WireArg};
use serde_json::{Value, json};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::args::{Arg, Args, Payload, RemoteCallback};
use crate::config::ProtocolConfig;
use crate::correlator::{CallbackCorrelator, CallbackError};
use crate::event::{self, EventName};
use crate::registry::{self, Listener, ListenerRegistry};

// =============================================================================
// TYPES
// =============================================================================

pub type ConnectionId = Uuid;

// Outbound slots only a close request may use.
const CLOSE_RESERVE: usize = 1;

/// Which side of the transport this connection represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle signal delivered by a transport driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

impl TransportEvent {
    /// Binary messages carry the same JSON text when they are valid UTF-8.
    #[must_use]
    pub fn from_binary(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Message(text.to_owned()),
            Err(e) => Self::Error(format!("binary frame is not UTF-8: {e}")),
        }
    }
}

/// Message for the transport driver to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    id: ConnectionId,
    role: Role,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::Sender<Outbound>,
    listeners: Mutex<ListenerRegistry<Args>>,
    correlator: Mutex<CallbackCorrelator>,
}

/// Non-owning connection handle.
#[derive(Clone)]
pub struct WeakConnection {
    id: ConnectionId,
    inner: Weak<Inner>,
}

impl WeakConnection {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(Connection::from_inner)
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

impl Connection {
    /// Create a connection in `Connecting` state, returning the queue its
    /// transport driver must drain.
    #[must_use]
    pub fn new(role: Role, config: &ProtocolConfig) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue_capacity());
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let conn = Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                role,
                state,
                outbound,
                listeners: Mutex::new(ListenerRegistry::new()),
                correlator: Mutex::new(CallbackCorrelator::new(
                    config.callback_timeout,
                    config.max_pending_callbacks,
                )),
            }),
        };
        conn.install_default_listeners();
        (conn, outbound_rx)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Built-in listeners. Ordinary entries: callers may remove them.
    fn install_default_listeners(&self) {
        let connection_id = self.id();
        self.on(event::OPEN, move |_| info!(%connection_id, "connection opened"));
        self.on(event::ERROR, move |args| {
            warn!(%connection_id, error = args.str(0).unwrap_or("-"), "connection error");
        });
        self.on(event::CLOSE, move |args| {
            info!(%connection_id, code = ?args.i64(0), reason = args.str(1).unwrap_or(""), "connection closed");
        });
        self.on(event::DISCONNECT, move |_| debug!(%connection_id, "connection disconnected"));

        let weak = self.downgrade();
        match self.role() {
            Role::Client => {
                self.once(event::OPEN, move |_| {
                    if let Some(conn) = weak.upgrade() {
                        conn.emit(event::IM_CONNECTED, std::iter::empty());
                    }
                });
            }
            Role::Server => {
                self.once(event::IM_CONNECTED, move |_| {
                    if let Some(conn) = weak.upgrade() {
                        conn.emit(event::CONNECT, std::iter::empty());
                    }
                });
            }
        }
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Connection {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection { id: self.inner.id, inner: Arc::downgrade(&self.inner) }
    }

    /// Number of callbacks sent to the peer and not yet resolved.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.correlator().len()
    }

    /// Wait until the connection leaves `Connecting`. Returns whether it opened.
    pub async fn opened(&self) -> bool {
        let mut rx = self.inner.state.subscribe();
        rx.wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map(|s| *s == ConnectionState::Open)
            .unwrap_or(false)
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    fn listeners(&self) -> MutexGuard<'_, ListenerRegistry<Args>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn correlator(&self) -> MutexGuard<'_, CallbackCorrelator> {
        self.inner
            .correlator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// LISTENERS
// =============================================================================

impl Connection {
    /// Subscribe `f` to `event`. The returned handle identifies this
    /// subscription for [`Connection::off`]. Invalid event names are ignored.
    pub fn on<F>(&self, event: &str, f: F) -> Listener<Args>
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        let listener = Listener::new(f);
        self.add_listener(event, listener.clone(), false);
        listener
    }

    /// Subscribe `f` to the next dispatch of `event` only.
    pub fn once<F>(&self, event: &str, f: F) -> Listener<Args>
    where
        F: Fn(Args) + Send + Sync + 'static,
    {
        let listener = Listener::new(f);
        self.add_listener(event, listener.clone(), true);
        listener
    }

    /// Register an existing handle. Returns `false` for an invalid event name.
    pub fn add_listener(&self, event: &str, listener: Listener<Args>, once: bool) -> bool {
        let Ok(name) = EventName::new(event) else {
            debug!(connection_id = %self.id(), event, "ignoring listener for invalid event name");
            return false;
        };
        let mut listeners = self.listeners();
        if once {
            listeners.once(name, listener);
        } else {
            listeners.on(name, listener);
        }
        true
    }

    /// Remove `listener` from `event`, or every listener of `event` when `None`.
    pub fn off(&self, event: &str, listener: Option<&Listener<Args>>) -> usize {
        self.listeners().off(event, listener)
    }

    /// Remove the listeners of one event, or of every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) -> usize {
        self.listeners().remove_all(event)
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners().listener_count(event)
    }

    /// Events with at least one listener, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.listeners()
            .event_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Invoke the local listeners of `event` with `args`. Returns how many ran
    /// to completion.
    pub fn dispatch(&self, event: &str, args: Args) -> usize {
        let snapshot = self.listeners().take_dispatch(event);
        if snapshot.is_empty() {
            return 0;
        }
        registry::invoke_all(event, snapshot, &args)
    }
}

// =============================================================================
// EMIT
// =============================================================================

impl Connection {
    /// Send `event` with `args` to the peer.
    ///
    /// Returns `false` if the event was dropped: invalid name, transport not
    /// open, outbound queue full, or driver gone. Dropping is not an error and
    /// is never retried. Callbacks of a frame that was built but could not be
    /// queued fail with [`CallbackError::NotSent`].
    pub fn emit(&self, event: &str, args: impl IntoIterator<Item = Payload>) -> bool {
        if EventName::new(event).is_err() {
            debug!(connection_id = %self.id(), event, "emit dropped: invalid event name");
            return false;
        }
        self.send_frame(event, None, args)
    }

    /// Send `event` with `args` plus a trailing callback, and wait for the
    /// peer to invoke it.
    pub fn request(
        &self,
        event: &str,
        args: impl IntoIterator<Item = Payload>,
    ) -> impl Future<Output = Result<Args, CallbackError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let reply = Payload::callback(move |result| {
            let _ = tx.send(result);
        });
        let sent = self.emit(event, args.into_iter().chain(std::iter::once(reply)));
        async move {
            if !sent {
                return Err(CallbackError::NotSent);
            }
            rx.await.unwrap_or(Err(CallbackError::ConnectionClosed))
        }
    }

    pub(crate) fn send_reply(
        &self,
        reply_to: CallbackId,
        event: &str,
        args: impl IntoIterator<Item = Payload>,
    ) -> bool {
        self.send_frame(event, Some(reply_to), args)
    }

    fn send_frame(
        &self,
        event: &str,
        reply_to: Option<CallbackId>,
        args: impl IntoIterator<Item = Payload>,
    ) -> bool {
        let mut refused = Vec::new();
        let queued = {
            // State is checked under the correlator lock: close flips the state
            // before draining, so no callback can be registered after the drain.
            let mut correlator = self.correlator();
            if !self.is_open() {
                debug!(connection_id = %self.id(), event, "emit dropped: transport not open");
                return false;
            }
            if self.inner.outbound.capacity() <= CLOSE_RESERVE {
                debug!(connection_id = %self.id(), event, "emit dropped: outbound queue full");
                return false;
            }

            let mut registered = Vec::new();
            let wire_args: Vec<WireArg> = args
                .into_iter()
                .enumerate()
                .map(|(index, payload)| match payload {
                    Payload::Value(v) => WireArg::Value(v),
                    Payload::Callback(cb) => match correlator.register(event, index, cb) {
                        Ok(id) => {
                            registered.push(id);
                            WireArg::Callback(id)
                        }
                        Err(rejected) => {
                            refused.push(rejected);
                            WireArg::Value(Value::Null)
                        }
                    },
                })
                .collect();

            let frame = match reply_to {
                Some(id) => Frame::reply(id, event, wire_args),
                None => Frame::new(event, wire_args),
            };
            match self.inner.outbound.try_send(Outbound::Text(frames::encode_frame(&frame))) {
                Ok(()) => Ok(()),
                Err(e) => {
                    let unsent: Vec<_> = registered
                        .into_iter()
                        .filter_map(|id| correlator.resolve(id))
                        .collect();
                    Err((e, unsent))
                }
            }
        };

        for (callback, err) in refused {
            warn!(connection_id = %self.id(), event, error = %err, "callback not registered");
            registry::isolate(event, move || callback.complete(Err(err)));
        }

        match queued {
            Ok(()) => {
                debug!(connection_id = %self.id(), event, reply_to = ?reply_to, "send frame");
                true
            }
            Err((e, unsent)) => {
                let reason = match e {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "transport driver gone",
                };
                debug!(connection_id = %self.id(), event, reason, "emit dropped");
                for p in unsent {
                    p.complete(Err(CallbackError::NotSent));
                }
                false
            }
        }
    }

    /// Close the transport. `close` and `disconnect` fire once the driver
    /// reports the closure.
    pub fn disconnect(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        match self.inner.outbound.try_send(Outbound::Close) {
            Ok(()) => {}
            // Only another close request can occupy the reserved slot.
            Err(TrySendError::Full(_)) => {
                debug!(connection_id = %self.id(), "close already requested");
            }
            Err(TrySendError::Closed(_)) => self.handle_closed(None, "transport driver gone"),
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

impl Connection {
    /// Apply one transport signal. Drivers call this sequentially, in
    /// arrival order.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_opened(),
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Closed { code, reason } => self.handle_closed(code, &reason),
            TransportEvent::Error(message) => {
                self.dispatch(event::ERROR, Args::from(vec![Value::String(message)]));
            }
        }
    }

    fn handle_opened(&self) {
        let opened = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });
        if opened {
            self.dispatch(event::OPEN, Args::default());
        }
    }

    fn handle_message(&self, text: &str) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        let frame = match frames::decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.dispatch(event::ERROR, Args::from(vec![json!(format!("malformed frame: {e}"))]));
                return;
            }
        };

        // Correlation replies never reach the listener registry.
        if let Some(reply_to) = frame.reply_to {
            let pending = self.correlator().resolve(reply_to);
            let args = self.inbound_args(&frame.event, frame.args);
            match pending {
                Some(pending) => pending.complete(Ok(args)),
                None => debug!(connection_id = %self.id(), reply_to, "reply for unknown or settled callback"),
            }
            return;
        }

        debug!(connection_id = %self.id(), event = %frame.event, args = frame.args.len(), "recv frame");
        let args = self.inbound_args(&frame.event, frame.args);
        self.dispatch(&frame.event, args);
    }

    /// Replace each callback slot with a proxy that replies to the peer.
    fn inbound_args(&self, event: &str, args: Vec<WireArg>) -> Args {
        Args::new(
            args.into_iter()
                .enumerate()
                .map(|(index, arg)| match arg {
                    WireArg::Value(v) => Arg::Value(v),
                    WireArg::Callback(id) => Arg::Callback(RemoteCallback::new(
                        id,
                        event,
                        index,
                        Arc::downgrade(&self.inner),
                    )),
                })
                .collect(),
        )
    }

    fn handle_closed(&self, code: Option<u16>, reason: &str) {
        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        if previous == ConnectionState::Closed {
            return;
        }

        let pending = self.correlator().drain();
        for p in pending {
            p.complete(Err(CallbackError::ConnectionClosed));
        }

        let args = Args::from(vec![code.map_or(Value::Null, |c| json!(c)), json!(reason)]);
        self.dispatch(event::CLOSE, args.clone());
        self.dispatch(event::DISCONNECT, args);
        self.listeners().remove_all(None);
    }

    /// Fail every callback older than the configured timeout. Returns how
    /// many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let (expired, timeout) = {
            let mut correlator = self.correlator();
            (correlator.expire_at(Instant::now()), correlator.timeout())
        };
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let count = expired.len();
        for p in expired {
            warn!(connection_id = %self.id(), event = p.event(), index = p.index(), "callback reply timed out");
            p.complete(Err(CallbackError::TimedOut { timeout_ms }));
        }
        count
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
