//! OpenAI Responses API adapter.
//!
//! Dialect notes:
//! - The conversation is a flat `input` list of items: assistant `message`
//!   items, `function_call` items and `function_call_output` items, all
//!   correlated by `call_id`
//! - Item `id` and `status` must be echoed back verbatim on replayed
//!   assistant messages and tool calls or the provider rejects the input;
//!   they live in the canonical model as `openai_id` / `openai_status`
//! - Reasoning effort is passed through as `reasoning.effort`
//! - An incomplete response due to `max_output_tokens` maps to the
//!   `max_tokens` stop reason

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

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiResponsesProvider {
    client: reqwest::Client,
}

impl OpenAiResponsesProvider {
    pub fn new() -> Self {
        Self {
            client: crate::default_http_client(),
        }
    }

    fn to_wire_input(conversation: &Conversation) -> Vec<Value> {
        let mut input = Vec::new();

        for message in &conversation.messages {
            match message {
                Message::User(user) => {
                    input.push(json!({
                        "type": "message",
                        "role": "user",
                        "content": [{ "type": "input_text", "text": user.text }],
                    }));
                }
                Message::Assistant(assistant) => {
                    let texts: Vec<Value> = assistant
                        .content
                        .iter()
                        .filter_map(|part| match part {
                            ContentPart::Text(t) => {
                                Some(json!({ "type": "output_text", "text": t.text }))
                            }
                            ContentPart::ToolCall(_) => None,
                        })
                        .collect();

                    if !texts.is_empty() {
                        let mut item = json!({
                            "type": "message",
                            "role": "assistant",
                            "content": texts,
                        });
                        // The provider rejects replayed items without these.
                        if let Some(id) = &assistant.openai_id {
                            item["id"] = json!(id);
                        }
                        if let Some(status) = &assistant.openai_status {
                            item["status"] = json!(status);
                        }
                        input.push(item);
                    }

                    for part in &assistant.content {
                        if let ContentPart::ToolCall(call) = part {
                            let mut item = json!({
                                "type": "function_call",
                                "call_id": call.id,
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            });
                            if let Some(id) = &call.openai_id {
                                item["id"] = json!(id);
                            }
                            if let Some(status) = &call.openai_status {
                                item["status"] = json!(status);
                            }
                            input.push(item);

                            if let Some(result) = &call.result {
                                input.extend(output_items(&call.id, result));
                            }
                        }
                    }

                    if let Some(hint) = &assistant.tool_error {
                        input.push(json!({
                            "type": "message",
                            "role": "user",
                            "content": [{ "type": "input_text", "text": hint }],
                        }));
                    }
                }
            }
        }

        input
    }

    fn to_wire_tools(conversation: &Conversation) -> Vec<Value> {
        conversation
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
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
            "instructions": wrap_system_prompt(&conversation.system_prompt),
            "input": Self::to_wire_input(conversation),
            "reasoning": { "effort": params.reasoning.as_str() },
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        let tools = Self::to_wire_tools(conversation);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }

        debug!(provider = "openai-responses", model = %params.model, "Sending completion request");

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
            warn!(status, body = %error_body, "OpenAI Responses API error");
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
        let mut message = AssistantMessage::default();

        for item in wire.output {
            match item {
                WireItem::Message {
                    id,
                    status,
                    content,
                    ..
                } => {
                    message.openai_id = id;
                    message.openai_status = status;
                    for entry in content {
                        if let WireContent::OutputText { text } = entry {
                            message.content.push(ContentPart::Text(TextPart {
                                text,
                                ..TextPart::default()
                            }));
                        }
                    }
                }
                WireItem::FunctionCall {
                    id,
                    status,
                    call_id,
                    name,
                    arguments,
                } => {
                    message.content.push(ContentPart::ToolCall(ToolCallPart {
                        id: call_id,
                        name,
                        arguments: serde_json::from_str(&arguments).unwrap_or_default(),
                        openai_id: id,
                        openai_status: status,
                        ..ToolCallPart::default()
                    }));
                }
                WireItem::Other => {}
            }
        }

        if message.content.is_empty() {
            return Err(CoreProviderError::EmptyCandidates);
        }

        if wire.status.as_deref() == Some("incomplete")
            && wire
                .incomplete_details
                .as_ref()
                .is_some_and(|d| d.reason.as_deref() == Some("max_output_tokens"))
        {
            message.stop_reason = Some(StopReason {
                code: StopReasonCode::MaxTokens,
                message: None,
            });
        }

        if let Some(usage) = wire.usage {
            message.usage = Usage::new(usage.input_tokens, usage.output_tokens);
        }

        Ok(message)
    }
}

impl Default for OpenAiResponsesProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai-responses"
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

/// A tool result as input items: the `function_call_output`, then one user
/// message per embedded image.
fn output_items(call_id: &str, result: &ToolResult) -> Vec<Value> {
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
                    "type": "message",
                    "role": "user",
                    "content": [{
                        "type": "input_image",
                        "image_url": format!("data:{mime_type};base64,{data}"),
                    }],
                }));
            }
        }
    }

    let mut items = vec![json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": text_lines.join("\n"),
    })];
    items.extend(image_messages);
    items
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    output: Vec<WireItem>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    incomplete_details: Option<WireIncompleteDetails>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireItem {
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        content: Vec<WireContent>,
    },
    FunctionCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent {
    OutputText {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireIncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn replayed_items_carry_echo_fields() {
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
                    openai_id: Some("fc_item_9".into()),
                    openai_status: Some("completed".into()),
                    ..ToolCallPart::default()
                }),
            ],
            openai_id: Some("msg_item_3".into()),
            openai_status: Some("completed".into()),
            ..AssistantMessage::default()
        }));

        let input = OpenAiResponsesProvider::to_wire_input(&conv);
        // user, assistant message, function_call, function_call_output
        assert_eq!(input.len(), 4);
        assert_eq!(input[1]["id"], "msg_item_3");
        assert_eq!(input[1]["status"], "completed");
        assert_eq!(input[2]["type"], "function_call");
        assert_eq!(input[2]["id"], "fc_item_9");
        assert_eq!(input[2]["call_id"], "call_1");
        assert_eq!(input[3]["type"], "function_call_output");
        assert_eq!(input[3]["call_id"], "call_1");
        assert_eq!(input[3]["output"], "pushed");
    }

    #[tokio::test]
    async fn complete_captures_item_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "output": [
                    {
                        "type": "message",
                        "id": "msg_out_1",
                        "status": "completed",
                        "role": "assistant",
                        "content": [{ "type": "output_text", "text": "Pushing 1" }]
                    },
                    {
                        "type": "function_call",
                        "id": "fc_out_2",
                        "status": "completed",
                        "call_id": "call_xyz",
                        "name": "push",
                        "arguments": "{\"value\":1,\"_is_done\":false}"
                    }
                ],
                "usage": { "input_tokens": 40, "output_tokens": 16 }
            })))
            .mount(&server)
            .await;

        let provider = OpenAiResponsesProvider::new();
        let params = CompletionParams {
            model: "gpt-4o".into(),
            api_key: "k".into(),
            endpoint: Some(format!("{}/v1/responses", server.uri())),
            ..CompletionParams::default()
        };
        let mut conv = Conversation::new("sys");
        conv.push(Message::user("Push 1"));

        let message = provider.complete(&conv, &params).await;
        assert_eq!(message.openai_id.as_deref(), Some("msg_out_1"));
        assert_eq!(message.usage, Usage::new(40, 16));
        let call = message.tool_calls().next().unwrap();
        assert_eq!(call.id, "call_xyz");
        assert_eq!(call.openai_id.as_deref(), Some("fc_out_2"));
        assert_eq!(call.arguments["_is_done"], false);
    }

    #[tokio::test]
    async fn incomplete_due_to_tokens_maps_to_max_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "incomplete",
                "incomplete_details": { "reason": "max_output_tokens" },
                "output": [{
                    "type": "message",
                    "role": "assistant",
                    "content": [{ "type": "output_text", "text": "trunc" }]
                }]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiResponsesProvider::new();
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
    async fn empty_output_becomes_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "completed", "output": [] })),
            )
            .mount(&server)
            .await;

        let provider = OpenAiResponsesProvider::new();
        let params = CompletionParams {
            api_key: "k".into(),
            endpoint: Some(server.uri()),
            ..CompletionParams::default()
        };

        let message = provider.complete(&Conversation::new("sys"), &params).await;
        assert_eq!(
            message.stop_reason.unwrap().code,
            StopReasonCode::Error
        );
    }
}
