//! MCP tool implementations.
//!
//! Tools are the external-collaborator boundary: the router resolves auth,
//! then hands each `tools/call` the resolved [`Identity`] through the
//! context. Tools never see the raw credential.

mod account;

pub use account::*;

use std::sync::Arc;

use crate::auth::Identity;
use crate::error::ToolResult;
use crate::store::RecordStore;

/// Tool execution context.
pub struct ToolContext {
    /// Record store boundary.
    pub store: Arc<dyn RecordStore>,
    /// Authenticated identity for this invocation.
    pub identity: Identity,
}

impl ToolContext {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, identity: Identity) -> Self {
        Self { store, identity }
    }
}

/// Trait for MCP tools.
#[async_trait::async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "account_status").
    fn name(&self) -> &'static str;

    /// Tool description for LLM.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input.
    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String>;
}

/// Register all tools.
#[must_use]
pub fn register_all_tools() -> Vec<Box<dyn McpTool>> {
    vec![Box::new(account::WhoAmITool), Box::new(account::AccountStatusTool)]
}
