use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Management CLI for feed-relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key (admin commands only)
    #[arg(short, long, env = "RELAY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay status
    Status,
    /// Show circuit breaker state per upstream
    Circuits,
    /// Show cache freshness counts
    Cache,
    /// List webhook subscriptions
    Subscriptions,
    /// Register a webhook subscription
    Register {
        /// Endpoint URL (http or https)
        #[arg(long)]
        url: String,
        /// Event type to subscribe to; repeat for several
        #[arg(long = "event", required = true)]
        events: Vec<String>,
    },
    /// Deactivate a subscription
    Deactivate { id: String },
    /// Send a webhook.test ping to a subscription
    Test { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut admin_headers = HeaderMap::new();
    if !cli.key.is_empty() {
        admin_headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{base}/admin/status"))
                .headers(admin_headers)
                .send()
                .await?
        }
        Commands::Circuits => {
            client.get(format!("{base}/admin/circuits"))
                .headers(admin_headers)
                .send()
                .await?
        }
        Commands::Cache => {
            client.get(format!("{base}/admin/cache"))
                .headers(admin_headers)
                .send()
                .await?
        }
        Commands::Subscriptions => client.get(format!("{base}/webhooks")).send().await?,
        Commands::Register { url, events } => {
            client.post(format!("{base}/webhooks"))
                .json(&json!({ "url": url, "events": events }))
                .send()
                .await?
        }
        Commands::Deactivate { id } => client.delete(format!("{base}/webhooks/{id}")).send().await?,
        Commands::Test { id } => client.post(format!("{base}/webhooks/{id}/test")).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: relay returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let body = res.text().await?;
    if body.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&body)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
