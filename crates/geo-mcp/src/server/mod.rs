//! GEO MCP server.
//!
//! Multiplexes two wire transports over one process: the Streamable HTTP
//! transport (`/mcp`) and the legacy HTTP+SSE pair (`/sse` + `/message`),
//! with the embedded OAuth authorization server in front of both.

pub mod jsonrpc;
pub mod legacy;
pub mod oauth;
pub mod router;
pub mod session;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::store::RecordStore;
use crate::tools::{self, McpTool};

/// The assembled MCP server.
pub struct McpServer {
    config: Config,
    store: Arc<dyn RecordStore>,
    tools: Vec<Box<dyn McpTool>>,
}

impl McpServer {
    /// Create a new MCP server over the given record store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> Self {
        let tools = tools::register_all_tools();
        Self { config, store, tools }
    }

    /// Run the HTTP server until shutdown.
    ///
    /// # Errors
    ///
    /// Returns error on bind or serve failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let port = self.config.port;
        tracing::info!(port, base_url = %self.config.base_url, "Starting GEO MCP server");
        tracing::info!("Registered {} tools", self.tools.len());

        let state = Arc::new(router::AppState::new(self.config, self.store, self.tools));
        let app = router::create_router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }

    /// List all available tools.
    #[must_use]
    pub fn list_tools(&self) -> Vec<(&str, &str)> {
        self.tools.iter().map(|t| (t.name(), t.description())).collect()
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer").field("tools", &self.tools.len()).finish()
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
