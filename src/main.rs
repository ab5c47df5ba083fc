//! feed-relay
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                    FEED RELAY                    │
//!                    │                                                  │
//!   feature code ────┼─▶ resilience::GuardedExecutor                    │
//!                    │      │  breaker admits? ──no──▶ cache / fallback │
//!                    │      ▼                                           │
//!                    │   upstream::UpstreamClient ──────────────────────┼──▶ providers
//!                    │      │ ok ──▶ cache.set                          │
//!                    │                                                  │
//!   feature code ────┼─▶ webhooks::WebhookDispatcher (spawned fan-out)  │
//!                    │      └─ sign → POST per subscriber ──────────────┼──▶ subscribers
//!                    │                                                  │
//!   operators ───────┼─▶ http (subscriptions, admin views)              │
//!                    │                                                  │
//!                    │   config · observability · lifecycle             │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use feed_relay::config::load_or_default;
use feed_relay::lifecycle::{wait_for_shutdown, Relay, Shutdown};
use feed_relay::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "feed-relay")]
#[command(about = "Circuit-broken feed relay with signed webhook fan-out", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "feed-relay starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        bind_address = %config.server.bind_address,
        admin_enabled = config.admin.enabled,
        persistence = ?config.webhooks.persistence_path,
        "Configuration loaded"
    );

    let relay = Relay::build(config)?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        trigger.trigger();
    });

    relay.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
