//! Anthropic Messages API adapter.
//!
//! Dialect notes:
//! - `x-api-key` header authentication (not Bearer) plus `anthropic-version`
//! - System prompt as a top-level field
//! - Tool use via `tool_use` content blocks; tool results travel in a *user*
//!   message as `tool_result` blocks, and results for adjacent calls are
//!   merged into a single user message
//! - `max_tokens` is mandatory; 4096 is substituted when the loop has no
//!   remaining budget figure

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use lowire_core::{
    AssistantMessage, ContentPart, Conversation, Message, StopReason, StopReasonCode, TextPart,
    ToolCallPart, ToolResult, ToolResultPart, Usage,
};

use crate::http::{fetch, FetchRequest};
use crate::{strip_schema_fields, wrap_system_prompt, CompletionParams, Provider};

use lowire_core::ProviderError as CoreProviderError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: i64 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: crate::default_http_client(),
        }
    }

    /// Translate the canonical conversation into Anthropic messages,
    /// interleaving tool results and the protocol-violation hint.
    fn to_wire_messages(conversation: &Conversation) -> Vec<WireMessage> {
        let mut wire = Vec::new();

        for message in &conversation.messages {
            match message {
                Message::User(user) => {
                    wire.push(WireMessage {
                        role: "user",
                        content: vec![WireBlock::Text {
                            text: user.text.clone(),
                        }],
                    });
                }
                Message::Assistant(assistant) => {
                    let mut blocks = Vec::new();
                    let mut results = Vec::new();

                    for part in &assistant.content {
                        match part {
                            ContentPart::Text(text) => blocks.push(WireBlock::Text {
                                text: text.text.clone(),
                            }),
                            ContentPart::ToolCall(call) => {
                                blocks.push(WireBlock::ToolUse {
                                    id: call.id.clone(),
                                    name: call.name.clone(),
                                    input: call.arguments.clone(),
                                });
                                if let Some(result) = &call.result {
                                    results.push(WireBlock::ToolResult {
                                        tool_use_id: call.id.clone(),
                                        content: result_blocks(result),
                                        is_error: result.is_error,
                                    });
                                }
                            }
                        }
                    }

                    if !blocks.is_empty() {
                        wire.push(WireMessage {
                            role: "assistant",
                            content: blocks,
                        });
                    }
                    // Adjacent results merge into one user message.
                    if !results.is_empty() {
                        wire.push(WireMessage {
                            role: "user",
                            content: results,
                        });
                    }
                    if let Some(hint) = &assistant.tool_error {
                        wire.push(WireMessage {
                            role: "user",
                            content: vec![WireBlock::Text { text: hint.clone() }],
                        });
                    }
                }
            }
        }

        wire
    }

    fn to_wire_tools(conversation: &Conversation) -> Vec<Value> {
        conversation
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": strip_schema_fields(&tool.input_schema, &["$schema"]),
                })
            })
            .collect()
    }

    async fn request(
        &self,
        conversation: &Conversation,
        params: &CompletionParams,
    ) -> Result<AssistantMessage, CoreProviderError> {
        let url = params
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let mut body = json!({
            "model": params.model,
            "system": wrap_system_prompt(&conversation.system_prompt),
            "messages": Self::to_wire_messages(conversation),
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        let tools = Self::to_wire_tools(conversation);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }

        debug!(provider = "anthropic", model = %params.model, "Sending completion request");

        let version = params
            .api_version
            .clone()
            .unwrap_or_else(|| ANTHROPIC_VERSION.to_string());
        let response = fetch(
            &self.client,
            FetchRequest {
                url,
                headers: vec![
                    ("x-api-key", params.api_key.clone()),
                    ("anthropic-version", version),
                ],
                body,
                timeout: params.timeout,
                cancel: params.cancel.clone(),
            },
        )
        .await
        .map_err(|e| CoreProviderError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(CoreProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| CoreProviderError::Parse(e.to_string()))?;

        Ok(Self::parse_response(wire))
    }

    fn parse_response(wire: WireResponse) -> AssistantMessage {
        let content = wire
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireResponseBlock::Text { text } => Some(ContentPart::Text(TextPart {
                    text,
                    ..TextPart::default()
                })),
                WireResponseBlock::ToolUse { id, name, input } => {
                    Some(ContentPart::ToolCall(ToolCallPart {
                        id,
                        name,
                        arguments: input,
                        ..ToolCallPart::default()
                    }))
                }
                WireResponseBlock::Other => None,
            })
            .collect();

        let stop_reason = match wire.stop_reason.as_deref() {
            Some("max_tokens") => Some(StopReason {
                code: StopReasonCode::MaxTokens,
                message: None,
            }),
            _ => None,
        };

        AssistantMessage {
            content,
            stop_reason,
            usage: Usage::new(wire.usage.input_tokens, wire.usage.output_tokens),
            ..AssistantMessage::default()
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        params: &CompletionParams,
    ) -> AssistantMessage {
        match self.request(conversation, params).await {
            Ok(message) => message,
            Err(e) => AssistantMessage::from_error(e.to_string()),
        }
    }
}

fn result_blocks(result: &ToolResult) -> Vec<Value> {
    result
        .content
        .iter()
        .map(|part| match part {
            ToolResultPart::Text { text } => json!({ "type": "text", "text": text }),
            ToolResultPart::Image { mime_type, data } => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime_type, "data": data },
            }),
        })
        .collect()
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<Value>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
