//! Demo server: greeting, callback arithmetic and room chat.
//!
//! Events:
//! - `greet(name)` → `greeting("hello, <name>")`
//! - `sum(a, b, reply)` → `reply(a + b)`
//! - `join(room, reply?)` / `leave(room, reply?)` → `reply(rooms)`
//! - `say(room, text)` → `said(id, text)` to the other members of `room`

use serde_json::{Value, json};
use tracing::{info, warn};
use wsio::{Args, Payload, Peer, Server, ServerConfig, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    let server = Server::new(config);
    server.on_connection(install_handlers);

    let listener = server.bind().await?;
    server.serve(listener).await
}

fn install_handlers(peer: Peer) {
    let connection_id = peer.id();
    info!(%connection_id, "demo: peer connected");

    let p = peer.clone();
    peer.on("greet", move |args| {
        let name = args.str(0).unwrap_or("stranger");
        p.emit("greeting", [Payload::value(format!("hello, {name}"))]);
    });

    peer.on("sum", |args| {
        let total = match (args.i64(0), args.i64(1)) {
            (Some(a), Some(b)) => json!(a.saturating_add(b)),
            _ => json!(args.f64(0).unwrap_or(0.0) + args.f64(1).unwrap_or(0.0)),
        };
        if let Some(reply) = args.callback(2) {
            reply.call([Payload::Value(total)]);
        }
    });

    let p = peer.clone();
    peer.on("join", move |args| {
        let Some(room) = args.str(0) else { return };
        if let Err(e) = p.join(room) {
            warn!(%connection_id, error = %e, "demo: join rejected");
        }
        reply_rooms(&p, &args);
    });

    let p = peer.clone();
    peer.on("leave", move |args| {
        if let Some(room) = args.str(0) {
            p.leave(room);
        }
        reply_rooms(&p, &args);
    });

    let p = peer.clone();
    peer.on("say", move |args| {
        let (Some(room), Some(text)) = (args.str(0), args.str(1)) else { return };
        let said = [json!(p.id().to_string()), json!(text)];
        if let Err(e) = p.broadcast(room, "said", &said) {
            warn!(%connection_id, room, error = %e, "demo: say failed");
        }
    });
}

/// Answer the trailing callback of `args`, if any, with the peer's rooms.
fn reply_rooms(peer: &Peer, args: &Args) {
    let Some(reply) = args.callback(args.len().saturating_sub(1)) else { return };
    let rooms: Vec<Value> = peer.rooms().into_iter().map(Value::String).collect();
    reply.call([Payload::value(rooms)]);
}
