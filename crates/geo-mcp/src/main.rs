//! GEO MCP Server - Entry Point

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use geo_mcp::config::Config;
use geo_mcp::server::McpServer;
use geo_mcp::store::{MemoryRecordStore, RecordStore, RestRecordStore};

#[derive(Parser, Debug)]
#[command(name = "geo-mcp")]
#[command(about = "MCP server for the GEO platform")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "3001", env = "PORT")]
    port: u16,

    /// Externally visible base URL, used in OAuth metadata and SSE endpoint
    /// announcements (e.g., https://mcp.example.com)
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Base URL of the external record store (PostgREST-style)
    #[arg(long, env = "RECORD_STORE_URL")]
    record_store_url: Option<String>,

    /// Service key for the external record store
    #[arg(long, env = "RECORD_STORE_SERVICE_KEY", hide_env_values = true)]
    record_store_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting GEO MCP server");

    let base_url =
        cli.base_url.unwrap_or_else(|| format!("http://localhost:{}", cli.port));
    let config =
        Config::new(cli.port, base_url, cli.record_store_url, cli.record_store_key);

    let store: Arc<dyn RecordStore> =
        match (&config.record_store_url, &config.record_store_key) {
            (Some(url), Some(key)) => {
                tracing::info!(url = %url, "Using external record store");
                Arc::new(RestRecordStore::new(url, key)?)
            }
            _ => {
                tracing::warn!("No record store configured; using in-memory store");
                Arc::new(MemoryRecordStore::new())
            }
        };

    McpServer::new(config, store).run_http().await
}
