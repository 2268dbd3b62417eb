//! Murmur Relay Server
//!
//! A WebSocket relay that admits named endpoints and routes their encrypted
//! messages. The server provides:
//! - First-come name reservation
//! - An address book of public values
//! - Zero-knowledge forwarding (never sees plaintext)
//!
//! Usage:
//!   murmur-relay [--port 3000] [--host 0.0.0.0] [--group modp2048]

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use murmur::crypto::Group;
use murmur::relay::{self, Hub};
use murmur::RelayConfig;
use tokio::net::TcpListener;
use tracing::info;

/// Murmur Relay Server
#[derive(Parser)]
#[command(name = "murmur-relay")]
#[command(about = "WebSocket relay for end-to-end encrypted messaging")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "MURMUR_PORT", default_value_t = murmur::config::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "MURMUR_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Diffie-Hellman group handed to every client (modp1024 or modp2048)
    #[arg(short, long, env = "MURMUR_GROUP", default_value = "modp2048")]
    group: Group,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        RelayConfig {
            host: args.host,
            port: args.port,
            group: args.group,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("murmur=info".parse()?)
                .add_directive("murmur_relay=info".parse()?),
        )
        .init();

    let config = RelayConfig::from(Args::parse());
    config.validate().map_err(|e| anyhow!(e))?;
    let addr = config.listen_addr().map_err(|e| anyhow!(e))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Murmur Relay Server listening on ws://{}", addr);
    info!("Serving {} modulus to every client", config.group);

    let hub = Arc::new(Hub::new(config.group.modulus()));
    relay::serve(listener, hub).await.context("accept loop failed")
}
