use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use wsio::{CallbackError, Connection, Payload, ProtocolConfig, client};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid websocket URL: {0}")]
    InvalidUrl(String),
    #[error("could not connect to {0}")]
    Connect(String),
    #[error("websocket closed")]
    Closed,
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("callback failed: {0}")]
    Callback(#[from] CallbackError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "wsio-cli", about = "Emit, call and listen for wsio events")]
struct Cli {
    #[arg(long, env = "WSIO_URL", default_value = "ws://127.0.0.1:3000/ws")]
    url: String,

    #[arg(long, env = "WSIO_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the server's `/healthz` endpoint.
    Ping,
    /// Send an event and exit.
    Emit {
        event: String,
        #[arg(help = "Arguments; each is parsed as JSON, falling back to a string")]
        args: Vec<String>,
    },
    /// Send an event with a trailing callback and print the reply.
    Call { event: String, args: Vec<String> },
    /// Print events as they arrive until interrupted.
    Listen {
        #[arg(required = true)]
        events: Vec<String>,
        #[arg(long, help = "Ask the server to join this room first")]
        room: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout_ms);

    match cli.command {
        Command::Ping => run_ping(&cli.url).await,
        Command::Emit { event, args } => run_emit(&cli.url, timeout, &event, &args).await,
        Command::Call { event, args } => run_call(&cli.url, timeout, &event, &args).await,
        Command::Listen { events, room } => run_listen(&cli.url, timeout, &events, room.as_deref()).await,
    }
}

async fn run_ping(url: &str) -> Result<(), CliError> {
    let response = reqwest::get(health_url(url)?).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_emit(url: &str, timeout: Duration, event: &str, args: &[String]) -> Result<(), CliError> {
    let conn = open(url, timeout).await?;
    if !conn.emit(event, payloads(args)) {
        return Err(CliError::Closed);
    }
    close(&conn, timeout).await;
    Ok(())
}

async fn run_call(url: &str, timeout: Duration, event: &str, args: &[String]) -> Result<(), CliError> {
    let conn = open(url, timeout).await?;
    let reply = with_timeout(timeout, conn.request(event, payloads(args))).await??;
    print_json(&Value::Array(reply.values()))?;
    close(&conn, timeout).await;
    Ok(())
}

async fn run_listen(
    url: &str,
    timeout: Duration,
    events: &[String],
    room: Option<&str>,
) -> Result<(), CliError> {
    let (conn, driver) = client::prepare(url, ProtocolConfig::default());
    for event in events {
        let name = event.clone();
        conn.on(event, move |args| {
            println!("{name} {}", Value::Array(args.values()));
        });
    }
    driver.spawn();
    if !with_timeout(timeout, conn.opened()).await? {
        return Err(CliError::Connect(url.to_owned()));
    }

    if let Some(room) = room {
        with_timeout(timeout, conn.request("join", [Payload::value(room)])).await??;
        eprintln!("joined room: {room}");
    }

    tokio::select! {
        () = conn.closed() => Err(CliError::Closed),
        _ = tokio::signal::ctrl_c() => {
            close(&conn, timeout).await;
            Ok(())
        }
    }
}

async fn open(url: &str, timeout: Duration) -> Result<Connection, CliError> {
    let conn = client::connect(url, ProtocolConfig::default());
    if with_timeout(timeout, conn.opened()).await? {
        Ok(conn)
    } else {
        Err(CliError::Connect(url.to_owned()))
    }
}

/// Close and wait for the driver to flush queued frames.
async fn close(conn: &Connection, timeout: Duration) {
    conn.disconnect();
    if tokio::time::timeout(timeout, conn.closed()).await.is_err() {
        eprintln!("warning: connection did not close within {}ms", timeout.as_millis());
    }
}

async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = T>) -> Result<T, CliError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CliError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))
}

fn payloads(args: &[String]) -> Vec<Payload> {
    args.iter().map(|raw| Payload::Value(parse_arg(raw))).collect()
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn health_url(ws_url: &str) -> Result<String, CliError> {
    let (scheme, rest) = if let Some(rest) = ws_url.strip_prefix("ws://") {
        ("http", rest)
    } else if let Some(rest) = ws_url.strip_prefix("wss://") {
        ("https", rest)
    } else {
        return Err(CliError::InvalidUrl(ws_url.to_owned()));
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(CliError::InvalidUrl(ws_url.to_owned()));
    }
    Ok(format!("{scheme}://{authority}/healthz"))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_arg_prefers_json() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_arg("\"quoted\""), json!("quoted"));
        assert_eq!(parse_arg("Ada"), json!("Ada"));
    }

    #[test]
    fn health_url_swaps_scheme_and_path() {
        assert_eq!(health_url("ws://127.0.0.1:3000/ws").unwrap(), "http://127.0.0.1:3000/healthz");
        assert_eq!(health_url("wss://example.test/socket").unwrap(), "https://example.test/healthz");
        assert_eq!(health_url("ws://host:1").unwrap(), "http://host:1/healthz");
        assert!(matches!(health_url("http://host/ws"), Err(CliError::InvalidUrl(_))));
        assert!(matches!(health_url("ws:///ws"), Err(CliError::InvalidUrl(_))));
    }
}
