//! Murmur CLI endpoint
//!
//! Connects to a relay under a name and speaks line-delimited JSON:
//! each stdin line `{"to": "...", "message": "..."}` is encrypted and sent
//! (`"to": "-1"` broadcasts), and each received message is printed to stdout
//! as `{"message", "time", "from", "to"}`. Logs go to stderr.

use anyhow::{anyhow, Context};
use clap::Parser;
use murmur::endpoint::{self, Event};
use murmur::protocol::Outgoing;
use murmur::transport::WebSocketTransport;
use murmur::EndpointConfig;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Murmur: end-to-end encrypted messaging through a relay
#[derive(Parser)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Name to register under (default: a random UUID)
    client_id: Option<String>,

    /// Relay WebSocket URL
    #[arg(short, long, env = "MURMUR_RELAY", default_value = murmur::config::DEFAULT_RELAY_URL)]
    relay: String,

    /// Seconds to wait for a peer's public value before dropping queued messages (0 = forever)
    #[arg(short, long, env = "MURMUR_KEY_TIMEOUT", default_value_t = murmur::config::DEFAULT_KEY_TIMEOUT_SECS)]
    key_timeout: u64,
}

impl From<Cli> for EndpointConfig {
    fn from(cli: Cli) -> Self {
        EndpointConfig {
            client_id: cli
                .client_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            relay_url: cli.relay,
            key_timeout_secs: cli.key_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is reserved for deliveries
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("murmur=info".parse()?),
        )
        .init();

    let config = EndpointConfig::from(Cli::parse());
    config.validate().map_err(|e| anyhow!(e))?;

    info!(name = %config.client_id, relay = %config.relay_url, "Connecting");
    let transport = WebSocketTransport::connect(&config.relay_url)
        .await
        .with_context(|| format!("cannot reach relay at {}", config.relay_url))?;

    let (input_tx, input_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    tokio::spawn(read_console(input_tx));
    let printer = tokio::spawn(print_events(event_rx));

    let key_timeout = config.key_timeout();
    let result = endpoint::run(transport, config.client_id, input_rx, event_tx, key_timeout).await;
    let _ = printer.await;
    result.context("endpoint stopped")
}

/// Forward well-formed stdin lines until EOF
async fn read_console(input: mpsc::Sender<Outgoing>) {
    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Outgoing::parse(&line) {
            Ok(outgoing) => {
                if input.send(outgoing).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("bad message {}: {}", line, e),
        }
    }
}

async fn print_events(mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Delivered(delivery) => match serde_json::to_string(&delivery) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("Failed to encode delivery: {}", e),
            },
            Event::Discarded { peer, messages } => {
                warn!(%peer, count = messages.len(), "Dropped queued messages");
            }
            // Already logged by the driver
            Event::Notice(_) => {}
        }
    }
}
