//! Server role — accepts websocket upgrades and hands each one out as a [`Peer`].
//!
//! ARCHITECTURE
//! ============
//! `Server` is a cheap clone over shared state: the config, the room
//! directory, and a listener registry for the server-level `connection`
//! event. `router()` mounts the websocket upgrade and a health check on an
//! axum `Router`.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → new server-role `Connection`, marked open (`open` fires)
//! 2. `connection` listeners receive the `Peer` and install event handlers
//! 3. Select loop: inbound text → `handle_transport_event`, outbound queue →
//!    socket, periodic tick → expire stale callbacks
//! 4. Close → leave every room → `close` / `disconnect` dispatch

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::{ConfigError, ServerConfig};
use crate::connection::{Connection, Outbound, Role, TransportEvent};
use crate::event::{self, EventName};
use crate::registry::{self, Listener, ListenerRegistry};
use crate::rooms::{RoomDirectory, RoomError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    rooms: RoomDirectory,
    listeners: Mutex<ListenerRegistry<Peer>>,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                rooms: RoomDirectory::new(),
                listeners: Mutex::new(ListenerRegistry::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn rooms(&self) -> &RoomDirectory {
        &self.inner.rooms
    }

    fn listeners(&self) -> MutexGuard<'_, ListenerRegistry<Peer>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // CONNECTION LISTENERS
    // =========================================================================

    /// Run `f` for every accepted connection.
    pub fn on_connection<F>(&self, f: F) -> Listener<Peer>
    where
        F: Fn(Peer) + Send + Sync + 'static,
    {
        let listener = Listener::new(f);
        self.listeners()
            .on(EventName::reserved(event::CONNECTION), listener.clone());
        listener
    }

    /// Run `f` for the next accepted connection only.
    pub fn once<F>(&self, f: F) -> Listener<Peer>
    where
        F: Fn(Peer) + Send + Sync + 'static,
    {
        let listener = Listener::new(f);
        self.listeners()
            .once(EventName::reserved(event::CONNECTION), listener.clone());
        listener
    }

    pub fn off(&self, listener: Option<&Listener<Peer>>) -> usize {
        self.listeners().off(event::CONNECTION, listener)
    }

    pub fn remove_all_listeners(&self) -> usize {
        self.listeners().remove_all(None)
    }

    fn dispatch_connection(&self, peer: &Peer) -> usize {
        let snapshot = self.listeners().take_dispatch(event::CONNECTION);
        registry::invoke_all(event::CONNECTION, snapshot, peer)
    }

    // =========================================================================
    // ROOMS
    // =========================================================================

    /// Emit `event` with `values` to every open member of `room`. Returns the
    /// number of members reached.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownRoom`] if the room does not exist.
    pub fn broadcast(&self, room: &str, event: &str, values: &[Value]) -> Result<usize, RoomError> {
        self.inner.rooms.broadcast(room, event, values, None)
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    /// Router with the websocket endpoint at the configured path and `/healthz`.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.inner.config.ws_path, get(handle_ws))
            .route("/healthz", get(healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Bind the configured `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        Ok(TcpListener::bind(self.inner.config.bind_addr()).await?)
    }

    /// Serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] on accept or local address failures.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, path = %self.inner.config.ws_path, "wsio listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// PEER
// =============================================================================

/// An accepted connection together with the room operations of its server.
///
/// Derefs to [`Connection`]. A `Peer` captured by one of its own listeners is
/// released when the connection closes and its listeners are cleared.
#[derive(Clone)]
pub struct Peer {
    conn: Connection,
    server: Server,
}

impl Peer {
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Join `room`. Returns `false` if already a member.
    ///
    /// # Errors
    ///
    /// [`RoomError::InvalidName`] for an empty room name.
    pub fn join(&self, room: &str) -> Result<bool, RoomError> {
        self.server.inner.rooms.join(room, &self.conn)
    }

    /// Leave `room`. Returns whether this peer was a member.
    pub fn leave(&self, room: &str) -> bool {
        self.server.inner.rooms.leave(room, self.conn.id())
    }

    /// Rooms this peer currently belongs to.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.server.inner.rooms.rooms_of(self.conn.id())
    }

    /// Emit to every other member of `room`.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownRoom`] if the room does not exist.
    pub fn broadcast(&self, room: &str, event: &str, values: &[Value]) -> Result<usize, RoomError> {
        self.server
            .inner
            .rooms
            .broadcast(room, event, values, Some(self.conn.id()))
    }
}

impl Deref for Peer {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// WEBSOCKET DRIVER
// =============================================================================

async fn handle_ws(State(server): State<Server>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, server))
}

async fn run_ws(mut socket: WebSocket, server: Server) {
    let protocol = server.inner.config.protocol;
    let (conn, mut outbound_rx) = Connection::new(Role::Server, &protocol);
    let connection_id = conn.id();
    info!(%connection_id, "ws: client connected");

    conn.handle_transport_event(TransportEvent::Opened);
    let peer = Peer { conn: conn.clone(), server: server.clone() };
    let handlers = server.dispatch_connection(&peer);
    debug!(%connection_id, handlers, "ws: connection listeners ran");
    drop(peer);

    let mut sweep = tokio::time::interval(protocol.sweep_period());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (code, reason) = loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    None => break (None, "connection dropped".to_owned()),
                    Some(Err(e)) => {
                        conn.handle_transport_event(TransportEvent::Error(e.to_string()));
                        break (Some(close_code::ABNORMAL), e.to_string());
                    }
                    Some(Ok(Message::Text(text))) => {
                        conn.handle_transport_event(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        conn.handle_transport_event(TransportEvent::from_binary(&bytes));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or((None, String::new()), |f| (Some(f.code), f.reason.as_str().to_owned()));
                    }
                    Some(Ok(_)) => {}
                }
            }
            out = outbound_rx.recv() => {
                match out {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = socket.send(Message::Text(text.into())).await {
                            break (Some(close_code::ABNORMAL), e.to_string());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let frame = CloseFrame { code: close_code::NORMAL, reason: "server disconnect".into() };
                        if let Err(e) = socket.send(Message::Close(Some(frame))).await {
                            debug!(%connection_id, error = %e, "ws: close frame not sent");
                        }
                        break (Some(close_code::NORMAL), "server disconnect".to_owned());
                    }
                }
            }
            _ = sweep.tick() => {
                conn.sweep_expired();
            }
        }
    };

    server.inner.rooms.leave_all(connection_id);
    conn.handle_transport_event(TransportEvent::Closed { code, reason });
    info!(%connection_id, "ws: client disconnected");
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
