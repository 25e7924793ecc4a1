//! GEO MCP Server
//!
//! A Model Context Protocol (MCP) server fronting the GEO content platform.
//! Speaks both the Streamable HTTP transport and the legacy HTTP+SSE
//! transport, and embeds an OAuth 2.1 authorization server that bridges
//! long-lived API keys into short-lived access/refresh tokens.
//!
//! # Features
//!
//! - **Dual transports**: `/mcp` (Streamable HTTP) and `/sse` + `/message`
//!   (legacy SSE) over a single process
//! - **OAuth 2.1**: dynamic client registration, authorization code with
//!   PKCE, refresh token rotation, RFC 8414/9728 discovery
//! - **Dual auth path**: OAuth access tokens and raw API keys on the same
//!   endpoint, resolved through one ordered chain
//! - **Session registry**: opaque ids, idle eviction on a periodic sweep
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geo_mcp::{config::Config, server::McpServer, store::MemoryRecordStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(MemoryRecordStore::new());
//!     McpServer::new(config, store).run_http().await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod tools;

pub use config::Config;
pub use error::{AuthError, StoreError, ToolError};
pub use server::McpServer;
