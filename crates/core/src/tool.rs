//! Tool descriptors and the tool-calling contract.
//!
//! Tools are supplied by the caller as a descriptor list plus a single
//! dispatch callback (`ToolHandler`). The runtime never executes anything
//! itself; it decorates the schemas with the completion signal, routes calls
//! through the handler, and folds the results back into the conversation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BoxError;
use crate::message::ToolResult;

/// The boolean input property injected into every tool schema. Setting it to
/// `true` on a successful call ends the run.
pub const IS_DONE_PROPERTY: &str = "_is_done";

/// Reserved `_meta` argument keys the scheduler injects into every dispatch.
pub const META_KEY: &str = "_meta";
pub const META_INTENT: &str = "dev.lowire/intent";
pub const META_HISTORY: &str = "dev.lowire/history";
pub const META_STATE: &str = "dev.lowire/state";

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,

    /// JSON-Schema-like object with `type`, `properties`, `required`.
    pub input_schema: Value,
}

/// A request routed to the caller's dispatch callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// The `callTool` contract. One handler serves every declared tool; the
/// handler is free to use or ignore the reserved `_meta` keys.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, invocation: ToolInvocation) -> Result<ToolResult, BoxError>;
}

/// Decorate every tool schema with the required `_is_done` property.
///
/// The caller's tool objects are not mutated; each wrapped tool is a copy
/// with a copied `input_schema`. Wrapping an already-wrapped list is a
/// no-op, so `required` carries `_is_done` exactly once.
pub fn wrap_tools(tools: &[Tool]) -> Vec<Tool> {
    tools
        .iter()
        .map(|tool| {
            let mut schema = tool.input_schema.clone();
            if !schema.is_object() {
                schema = json!({ "type": "object" });
            }
            let obj = schema.as_object_mut().unwrap();

            let properties = obj
                .entry("properties")
                .or_insert_with(|| json!({}))
                .as_object_mut();
            if let Some(properties) = properties {
                properties.insert(
                    IS_DONE_PROPERTY.to_string(),
                    json!({
                        "type": "boolean",
                        "description": "Whether the task is complete. If false, agentic loop will continue to perform the task.",
                    }),
                );
            }

            let required = obj
                .entry("required")
                .or_insert_with(|| json!([]))
                .as_array_mut();
            if let Some(required) = required {
                if !required.iter().any(|v| v.as_str() == Some(IS_DONE_PROPERTY)) {
                    required.push(Value::String(IS_DONE_PROPERTY.to_string()));
                }
            }

            Tool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: schema,
            }
        })
        .collect()
}
