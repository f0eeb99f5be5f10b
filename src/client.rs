//! Client role — dials a websocket URL and drives a client-role [`Connection`].
//!
//! The driver runs on its own task: it performs the websocket handshake,
//! reports `Opened`, then relays frames both ways until either side closes.
//! A failed handshake is reported as an `error` dispatch followed by
//! `close`/`disconnect`, so callers observe one uniform lifecycle.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::connection::{Connection, Outbound, Role, TransportEvent};

const ABNORMAL_CLOSE: u16 = 1006;

/// Connect to `url` in the background and return the connection at once,
/// still `Connecting`. Must be called within a tokio runtime.
///
/// Listeners registered right away may race the handshake; use [`prepare`]
/// to install them before the driver starts.
#[must_use]
pub fn connect(url: &str, config: ProtocolConfig) -> Connection {
    let (conn, driver) = prepare(url, config);
    driver.spawn();
    conn
}

/// Create a client connection and the driver that will dial `url`, without
/// starting it.
#[must_use]
pub fn prepare(url: &str, config: ProtocolConfig) -> (Connection, ClientDriver) {
    let (conn, outbound_rx) = Connection::new(Role::Client, &config);
    let driver = ClientDriver {
        url: url.to_owned(),
        conn: conn.clone(),
        outbound_rx,
        sweep_interval: config.sweep_period(),
    };
    (conn, driver)
}

pub struct ClientDriver {
    url: String,
    conn: Connection,
    outbound_rx: mpsc::Receiver<Outbound>,
    sweep_interval: Duration,
}

impl ClientDriver {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Dial, then relay until the transport closes.
    pub async fn run(self) {
        let Self { url, conn, mut outbound_rx, sweep_interval } = self;
        let connection_id = conn.id();

        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!(%connection_id, %url, error = %e, "ws: connect failed");
                conn.handle_transport_event(TransportEvent::Error(format!("connect failed: {e}")));
                conn.handle_transport_event(TransportEvent::Closed {
                    code: None,
                    reason: e.to_string(),
                });
                return;
            }
        };
        info!(%connection_id, %url, "ws: connected");
        conn.handle_transport_event(TransportEvent::Opened);

        let (mut sink, mut stream) = stream.split();
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let (code, reason) = loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        None => break (None, "connection dropped".to_owned()),
                        Some(Err(e)) => {
                            conn.handle_transport_event(TransportEvent::Error(e.to_string()));
                            break (Some(ABNORMAL_CLOSE), e.to_string());
                        }
                        Some(Ok(Message::Text(text))) => {
                            conn.handle_transport_event(TransportEvent::Message(text.to_string()));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            conn.handle_transport_event(TransportEvent::from_binary(&bytes));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map_or((None, String::new()), |f| {
                                (Some(u16::from(f.code)), f.reason.to_string())
                            });
                        }
                        Some(Ok(_)) => {}
                    }
                }
                out = outbound_rx.recv() => {
                    match out {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                break (Some(ABNORMAL_CLOSE), e.to_string());
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let frame = CloseFrame { code: CloseCode::Normal, reason: "client disconnect".into() };
                            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                                debug!(%connection_id, error = %e, "ws: close frame not sent");
                            }
                            break (Some(u16::from(CloseCode::Normal)), "client disconnect".to_owned());
                        }
                    }
                }
                _ = sweep.tick() => {
                    conn.sweep_expired();
                }
            }
        };

        conn.handle_transport_event(TransportEvent::Closed { code, reason });
        info!(%connection_id, "ws: disconnected");
    }
}
