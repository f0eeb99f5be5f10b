//! Named-event messaging over websockets with remote callbacks and rooms.
//!
//! SYSTEM CONTEXT
//! ==============
//! Both ends of a websocket hold a [`Connection`]: a registry of listeners
//! keyed by event name, an `emit` that sends `(event, args)` to the peer, and
//! a correlator that lets an argument be a function. The peer receives a
//! [`RemoteCallback`] in that slot; calling it sends the reply back to the
//! origin, which invokes the original [`Callback`] exactly once.
//!
//! The server role ([`Server`]) hands each accepted connection to its
//! `connection` listeners as a [`Peer`], which adds room membership and
//! room broadcast. The client role is [`client::connect`].
//!
//! Wire frames are defined by the `frames` crate.

pub mod args;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod event;
pub mod registry;
pub mod rooms;
pub mod server;

pub use args::{Arg, Args, Callback, Payload, RemoteCallback};
pub use config::{ConfigError, ProtocolConfig, ServerConfig};
pub use connection::{
    Connection, ConnectionId, ConnectionState, Outbound, Role, TransportEvent, WeakConnection,
};
pub use correlator::CallbackError;
pub use registry::Listener;
pub use rooms::{RoomDirectory, RoomError};
pub use server::{Peer, Server, ServerError};
