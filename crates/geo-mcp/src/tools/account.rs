//! Account introspection tools.

use super::{McpTool, ToolContext};
use crate::error::ToolResult;

/// Report the authenticated identity.
pub struct WhoAmITool;

#[async_trait::async_trait]
impl McpTool for WhoAmITool {
    fn name(&self) -> &'static str {
        "whoami"
    }

    fn description(&self) -> &'static str {
        "Show the client identity and credential id behind the current authorization"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        Ok(format!(
            "Client: {}\nCredential: {}",
            ctx.identity.client_id, ctx.identity.credential_id
        ))
    }
}

/// Look up the subscription backing the current credential.
pub struct AccountStatusTool;

#[async_trait::async_trait]
impl McpTool for AccountStatusTool {
    fn name(&self) -> &'static str {
        "account_status"
    }

    fn description(&self) -> &'static str {
        "Show the subscription status and plan for the authenticated account"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        let subscription = ctx.store.subscription(&ctx.identity.client_id).await?;

        Ok(match subscription {
            Some(subscription) => {
                let plan = subscription.plan.as_deref().unwrap_or("unknown");
                format!(
                    "Subscription: {:?} (plan: {plan})",
                    subscription.status
                )
                .to_lowercase()
            }
            None => "No subscription on file".to_string(),
        })
    }
}
