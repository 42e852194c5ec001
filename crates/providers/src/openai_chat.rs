//! OpenAI Chat Completions adapter.
//!
//! Dialect notes:
//! - Flat `messages` list with a leading `system` entry
//! - Assistant tool calls ride in `tool_calls` with JSON-*encoded* arguments
//! - Each tool result is its own `role: "tool"` message keyed by
//!   `tool_call_id`; images are not accepted there, so an image result
//!   becomes a placeholder line plus a follow-up user message carrying the
//!   picture
//! - `parallel_tool_calls` is pinned to `false`
//! - `finish_reason: "length"` maps to the `max_tokens` stop reason

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use lowire_core::{
    AssistantMessage, ContentPart, Conversation, Message, ProviderError as CoreProviderError,
    StopReason, StopReasonCode, TextPart, ToolCallPart, ToolResult, ToolResultPart, Usage,
};

use crate::http::{fetch, FetchRequest};
use crate::{wrap_system_prompt, CompletionParams, Provider};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiChatProvider {
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new() -> Self {
        Self {
            client: crate::default_http_client(),
        }
    }

    fn to_wire_messages(conversation: &Conversation) -> Vec<Value> {
        let mut wire = vec![json!({
            "role": "system",
            "content": wrap_system_prompt(&conversation.system_prompt),
        })];

        for message in &conversation.messages {
            match message {
                Message::User(user) => {
                    wire.push(json!({ "role": "user", "content": user.text }));
                }
                Message::Assistant(assistant) => {
                    let mut tool_calls = Vec::new();
                    let mut results = Vec::new();

                    for part in &assistant.content {
                        if let ContentPart::ToolCall(call) = part {
                            tool_calls.push(json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            }));
                            if let Some(result) = &call.result {
                                results.extend(result_messages(&call.id, result));
                            }
                        }
                    }

                    let mut entry = json!({ "role": "assistant" });
                    let text = assistant.text();
                    if !text.is_empty() {
                        entry["content"] = json!(text);
                    }
                    if !tool_calls.is_empty() {
                        entry["tool_calls"] = Value::Array(tool_calls);
                    }
                    wire.push(entry);
                    wire.extend(results);

                    if let Some(hint) = &assistant.tool_error {
                        wire.push(json!({ "role": "user", "content": hint }));
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
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    },
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
            "messages": Self::to_wire_messages(conversation),
            "parallel_tool_calls": false,
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        let tools = Self::to_wire_tools(conversation);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }

        debug!(provider = "openai", model = %params.model, "Sending completion request");

        let response = fetch(
            &self.client,
            FetchRequest {
                url,
                headers: vec![("Authorization", format!("Bearer {}", params.api_key))],
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
            warn!(status, body = %error_body, "OpenAI API error");
            return Err(CoreProviderError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| CoreProviderError::Parse(e.to_string()))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or(CoreProviderError::EmptyCandidates)?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ContentPart::Text(TextPart {
                    text,
                    ..TextPart::default()
                }));
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            content.push(ContentPart::ToolCall(ToolCallPart {
                id: call.id,
                name: call.function.name,
                arguments: serde_json::from_str(&call.function.arguments).unwrap_or_default(),
                ..ToolCallPart::default()
            }));
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("length") => Some(StopReason {
                code: StopReasonCode::MaxTokens,
                message: None,
            }),
            _ => None,
        };

        let usage = wire
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(AssistantMessage {
            content,
            stop_reason,
            usage,
            ..AssistantMessage::default()
        })
    }
}

impl Default for OpenAiChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
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

/// A tool result as wire messages: the `tool` message itself, then one user
/// message per embedded image.
fn result_messages(call_id: &str, result: &ToolResult) -> Vec<Value> {
    let mut text_lines = Vec::new();
    let mut image_messages = Vec::new();

    for part in &result.content {
        match part {
            ToolResultPart::Text { text } => text_lines.push(text.clone()),
            ToolResultPart::Image { mime_type, data } => {
                text_lines.push(
                    "This tool result included an image that is uploaded in the next message."
                        .to_string(),
                );
                image_messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "image_url",
                        "image_url": { "url": format!("data:{mime_type};base64,{data}") },
                    }],
                }));
            }
        }
    }

    let mut messages = vec![json!({
        "role": "tool",
        "tool_call_id": call_id,
        "content": text_lines.join("\n"),
    })];
    messages.extend(image_messages);
    messages
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn assistant_with_results_expands_to_tool_messages() {
        let mut conv = Conversation::new("sys");
        conv.push(Message::user("go"));
        conv.push(Message::Assistant(AssistantMessage {
            content: vec![
                ContentPart::text("calling"),
                ContentPart::ToolCall(ToolCallPart {
                    id: "call_1".into(),
                    name: "push".into(),
                    arguments: json!({"value": 1}),
                    result: Some(ToolResult::text("pushed")),
                    ..ToolCallPart::default()
                }),
            ],
            ..AssistantMessage::default()
        }));

        let wire = OpenAiChatProvider::to_wire_messages(&conv);
        // system, user, assistant, tool
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["role"], "assistant");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"],
            json!({"value": 1}).to_string()
        );
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["content"], "pushed");
    }

    #[test]
    fn image_result_gets_placeholder_and_user_message() {
        let result = ToolResult {
            content: vec![ToolResultPart::Image {
                mime_type: "image/png".into(),
                data: "aGVsbG8=".into(),
            }],
            ..ToolResult::default()
        };

        let messages = result_messages("call_9", &result);
        assert_eq!(messages.len(), 2);
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .contains("uploaded in the next message"));
        assert_eq!(messages[1]["role"], "user");
        assert!(messages[1]["content"][0]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn complete_parses_tool_calls_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": "Pushing 1",
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {
                                "name": "push",
                                "arguments": "{\"value\":1,\"_is_done\":false}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": { "prompt_tokens": 30, "completion_tokens": 12 }
            })))
            .mount(&server)
            .await;

        let provider = OpenAiChatProvider::new();
        let params = CompletionParams {
            model: "gpt-4o".into(),
            api_key: "test_key".into(),
            endpoint: Some(format!("{}/v1/chat/completions", server.uri())),
            ..CompletionParams::default()
        };
        let mut conv = Conversation::new("sys");
        conv.push(Message::user("Push 1"));

        let message = provider.complete(&conv, &params).await;
        assert_eq!(message.usage, Usage::new(30, 12));
        let call = message.tool_calls().next().unwrap();
        assert_eq!(call.name, "push");
        assert_eq!(call.arguments["value"], 1);
        assert!(message.stop_reason.is_none());
    }

    #[tokio::test]
    async fn length_finish_reason_maps_to_max_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": { "content": "trunc" },
                    "finish_reason": "length"
                }]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiChatProvider::new();
        let params = CompletionParams {
            api_key: "k".into(),
            endpoint: Some(server.uri()),
            ..CompletionParams::default()
        };

        let message = provider.complete(&Conversation::new("sys"), &params).await;
        assert_eq!(
            message.stop_reason.unwrap().code,
            StopReasonCode::MaxTokens
        );
    }

    #[tokio::test]
    async fn empty_choices_become_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let provider = OpenAiChatProvider::new();
        let params = CompletionParams {
            api_key: "k".into(),
            endpoint: Some(server.uri()),
            ..CompletionParams::default()
        };

        let message = provider.complete(&Conversation::new("sys"), &params).await;
        let reason = message.stop_reason.unwrap();
        assert_eq!(reason.code, StopReasonCode::Error);
        assert!(reason.message.unwrap().contains("no candidates"));
    }
}
