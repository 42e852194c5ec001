//! Google Gemini `generateContent` adapter.
//!
//! Dialect notes:
//! - Messages are `contents` with `role` in `user` / `model` / `function`;
//!   tool calls are `functionCall` parts on a model message and results are
//!   `functionResponse` parts on a `function` message
//! - Gemini has no call ids; canonical ids are synthesized per message
//!   (`call_0`, `call_1`, …) and correlation on the wire happens by name
//! - `thoughtSignature` must be echoed verbatim on every replayed text and
//!   tool-call part
//! - Tool schemas are stripped of `additionalProperties` and `$schema`
//! - Image tool-result parts are re-emitted as a user message with
//!   `inline_data`; other unsupported parts are dropped
//! - `finishReason: MAX_TOKENS` maps to the `max_tokens` stop reason

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use lowire_core::{
    AssistantMessage, ContentPart, Conversation, Message, ProviderError as CoreProviderError,
    StopReason, StopReasonCode, TextPart, ToolCallPart, ToolResult, ToolResultPart, Usage,
};

use crate::http::{fetch, FetchRequest};
use crate::{strip_schema_fields, wrap_system_prompt, CompletionParams, Provider};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GoogleProvider {
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self {
            client: crate::default_http_client(),
        }
    }

    fn endpoint(params: &CompletionParams) -> String {
        let base = params
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        format!(
            "{}/v1beta/models/{}:generateContent",
            base.trim_end_matches('/'),
            params.model
        )
    }

    fn to_wire_contents(conversation: &Conversation) -> Vec<Value> {
        let mut contents = Vec::new();

        for message in &conversation.messages {
            match message {
                Message::User(user) => {
                    contents.push(json!({
                        "role": "user",
                        "parts": [{ "text": user.text }],
                    }));
                }
                Message::Assistant(assistant) => {
                    let mut model_parts = Vec::new();
                    let mut response_parts = Vec::new();
                    let mut image_parts = Vec::new();

                    for part in &assistant.content {
                        match part {
                            ContentPart::Text(text) => {
                                let mut wire = json!({ "text": text.text });
                                if let Some(sig) = &text.google_thought_signature {
                                    wire["thoughtSignature"] = json!(sig);
                                }
                                model_parts.push(wire);
                            }
                            ContentPart::ToolCall(call) => {
                                let mut wire = json!({
                                    "functionCall": {
                                        "name": call.name,
                                        "args": call.arguments,
                                    },
                                });
                                if let Some(sig) = &call.google_thought_signature {
                                    wire["thoughtSignature"] = json!(sig);
                                }
                                model_parts.push(wire);

                                if let Some(result) = &call.result {
                                    response_parts.push(function_response(&call.name, result));
                                    image_parts.extend(inline_images(result));
                                }
                            }
                        }
                    }

                    if !model_parts.is_empty() {
                        contents.push(json!({ "role": "model", "parts": model_parts }));
                    }
                    if !response_parts.is_empty() {
                        contents.push(json!({ "role": "function", "parts": response_parts }));
                    }
                    if !image_parts.is_empty() {
                        contents.push(json!({ "role": "user", "parts": image_parts }));
                    }
                    if let Some(hint) = &assistant.tool_error {
                        contents.push(json!({
                            "role": "user",
                            "parts": [{ "text": hint }],
                        }));
                    }
                }
            }
        }

        contents
    }

    fn to_wire_tools(conversation: &Conversation) -> Option<Value> {
        if conversation.tools.is_empty() {
            return None;
        }
        let declarations: Vec<Value> = conversation
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": strip_schema_fields(
                        &tool.input_schema,
                        &["additionalProperties", "$schema"],
                    ),
                })
            })
            .collect();
        Some(json!([{ "functionDeclarations": declarations }]))
    }

    async fn request(
        &self,
        conversation: &Conversation,
        params: &CompletionParams,
    ) -> Result<AssistantMessage, CoreProviderError> {
        let mut generation_config = json!({});
        if let Some(temperature) = params.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }

        let mut body = json!({
            "systemInstruction": {
                "parts": [{ "text": wrap_system_prompt(&conversation.system_prompt) }],
            },
            "contents": Self::to_wire_contents(conversation),
            "generationConfig": generation_config,
        });
        if let Some(tools) = Self::to_wire_tools(conversation) {
            body["tools"] = tools;
        }

        debug!(provider = "google", model = %params.model, "Sending completion request");

        let response = fetch(
            &self.client,
            FetchRequest {
                url: Self::endpoint(params),
                headers: vec![("x-goog-api-key", params.api_key.clone())],
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
            warn!(status, body = %error_body, "Google API error");
            return Err(CoreProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| CoreProviderError::Parse(e.to_string()))?;

        Self::parse_response(wire)
    }

    fn parse_response(wire: WireResponse) -> Result<AssistantMessage, CoreProviderError> {
        let candidate = wire
            .candidates
            .into_iter()
            .next()
            .ok_or(CoreProviderError::EmptyCandidates)?;

        let mut message = AssistantMessage::default();
        let mut call_index = 0usize;

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                message.content.push(ContentPart::ToolCall(ToolCallPart {
                    id: format!("call_{call_index}"),
                    name: call.name,
                    arguments: call.args,
                    google_thought_signature: part.thought_signature,
                    ..ToolCallPart::default()
                }));
                call_index += 1;
            } else if let Some(text) = part.text {
                message.content.push(ContentPart::Text(TextPart {
                    text,
                    google_thought_signature: part.thought_signature,
                    ..TextPart::default()
                }));
            }
            // Other part kinds are dropped.
        }

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            message.stop_reason = Some(StopReason {
                code: StopReasonCode::MaxTokens,
                message: None,
            });
        }

        if let Some(usage) = wire.usage_metadata {
            message.usage = Usage::new(usage.prompt_token_count, usage.candidates_token_count);
        }

        Ok(message)
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
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

fn function_response(name: &str, result: &ToolResult) -> Value {
    let mut response = json!({ "content": result.flattened_text() });
    if result.is_error {
        response["isError"] = json!(true);
    }
    json!({ "functionResponse": { "name": name, "response": response } })
}

fn inline_images(result: &ToolResult) -> Vec<Value> {
    result
        .content
        .iter()
        .filter_map(|part| match part {
            ToolResultPart::Image { mime_type, data } => Some(json!({
                "inline_data": { "mime_type": mime_type, "data": data },
            })),
            ToolResultPart::Text { .. } => None,
        })
        .collect()
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<WireFunctionCall>,
    #[serde(rename = "thoughtSignature", default)]
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}
