//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the entire system:
//! the scheduler appends messages, provider adapters translate them to a
//! wire dialect and back, and the replay cache fingerprints the whole
//! conversation. Serialization must therefore be deterministic: no
//! timestamps, no generated ids, and optional fields are skipped when absent
//! so that a round-tripped conversation is byte-identical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in a conversation, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    /// Create a new assistant message from content parts.
    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Message::Assistant(AssistantMessage {
            content,
            ..AssistantMessage::default()
        })
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            Message::User(_) => None,
        }
    }

    pub fn as_assistant_mut(&mut self) -> Option<&mut AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            Message::User(_) => None,
        }
    }
}

/// Plain text from the user (or a synthetic recap produced by the
/// summarizer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

/// A provider reply: an ordered sequence of text and tool-call parts.
///
/// Provider echo fields (`openai_id`, `openai_status`) are opaque to the
/// core and must survive untouched for as long as the message stays in the
/// conversation; the origin provider rejects replayed messages without them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentPart>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Protocol-violation hint fed back to the model on the next turn.
    /// Adapters serialize it as a synthetic user message after this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,

    /// Token usage of the turn that produced this message. Riding on the
    /// message keeps replayed runs byte-identical to recorded ones.
    #[serde(default, skip_serializing_if = "Usage::is_zero")]
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_status: Option<String>,
}

impl AssistantMessage {
    /// An assistant message representing a failed completion. The loop
    /// surfaces the message text as the run error.
    pub fn from_error(message: impl Into<String>) -> Self {
        AssistantMessage {
            stop_reason: Some(StopReason {
                code: StopReasonCode::Error,
                message: Some(message.into()),
            }),
            ..AssistantMessage::default()
        }
    }

    /// All text parts joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(t) => Some(t.text.as_str()),
                ContentPart::ToolCall(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall(c) => Some(c),
            ContentPart::Text(_) => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }
}

/// One part of an assistant message, tagged by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text(TextPart),
    ToolCall(ToolCallPart),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(TextPart {
            text: text.into(),
            ..TextPart::default()
        })
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ContentPart::ToolCall(ToolCallPart {
            id: id.into(),
            name: name.into(),
            arguments,
            ..ToolCallPart::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPart {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_status: Option<String>,

    /// Google requires this signature echoed verbatim on replayed parts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_thought_signature: Option<String>,
}

/// A tool-call request embedded in an assistant message. The scheduler
/// attaches the result in place once the tool has run, so a committed
/// conversation never carries an orphan call across a turn boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    pub arguments: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_thought_signature: Option<String>,
}

impl ToolCallPart {
    /// Whether the completion signal was set on this call's arguments.
    pub fn is_done(&self) -> bool {
        self.arguments
            .get(crate::tool::IS_DONE_PROPERTY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ToolResultPart>,

    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,

    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ToolResultMeta>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolResultPart::Text { text: text.into() }],
            ..ToolResult::default()
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolResultPart::Text { text: text.into() }],
            is_error: true,
            meta: None,
        }
    }

    /// All text parts joined with newlines; images are elided.
    pub fn flattened_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ToolResultPart::Text { text } => Some(text.as_str()),
                ToolResultPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultPart {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64-encoded payload.
        data: String,
    },
}

/// Tool-supplied side data carried under the reserved `_meta` key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolResultMeta {
    /// Categorized log lines the summarizer renders as `<category>…</category>`.
    #[serde(
        rename = "dev.lowire/history",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub history: Vec<HistoryItem>,

    /// Per-tool persistent state fragments, keyed by name. Survives
    /// summarization until superseded by a later fragment for the same key.
    #[serde(
        rename = "dev.lowire/state",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub state: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub category: String,
    pub content: String,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopReason {
    pub code: StopReasonCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReasonCode {
    Ok,
    MaxTokens,
    Error,
}

/// The conversation handed to a provider adapter: system prompt, ordered
/// messages, and the stable tool list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub system_prompt: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<crate::tool::Tool>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Conversation {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&AssistantMessage> {
        self.messages.iter().rev().find_map(Message::as_assistant)
    }
}

/// Additive token counters for one turn or a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
}

impl Usage {
    pub fn new(input: u64, output: u64) -> Self {
        Usage { input, output }
    }

    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.output == 0
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: Usage) {
        self.input += other.input;
        self.output += other.output;
    }
}
