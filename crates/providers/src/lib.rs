//! Provider adapters for the lowire agent runtime.
//!
//! Four wire dialects (OpenAI Chat Completions, OpenAI Responses, Anthropic,
//! Google) implement the single `Provider` completion contract over the
//! canonical conversation. Adapters never fail: transport, parse, and
//! empty-candidate errors are normalized into an assistant message with an
//! `error` stop reason so the loop can surface them uniformly.

pub mod anthropic;
pub mod google;
pub mod http;
pub mod openai_chat;
pub mod openai_responses;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use lowire_core::{AssistantMessage, Conversation};

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use http::{fetch, FetchError, FetchRequest};
pub use openai_chat::OpenAiChatProvider;
pub use openai_responses::OpenAiResponsesProvider;
pub use registry::{Api, ProviderRegistry};

/// Requested reasoning effort, translated per dialect where supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningEffort {
    #[default]
    None,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Per-call completion settings resolved by the loop from its run options.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub api_key: String,

    /// Overrides the dialect's default endpoint when set.
    pub endpoint: Option<String>,
    pub api_version: Option<String>,
    pub timeout: Option<Duration>,
    pub temperature: Option<f64>,
    pub reasoning: ReasoningEffort,

    /// Remaining token budget for this turn; dialects with a mandatory
    /// ceiling substitute their own default when unset.
    pub max_tokens: Option<i64>,

    pub cancel: CancellationToken,
}

impl Default for CompletionParams {
    fn default() -> Self {
        CompletionParams {
            model: String::new(),
            api_key: String::new(),
            endpoint: None,
            api_version: None,
            timeout: None,
            temperature: None,
            reasoning: ReasoningEffort::None,
            max_tokens: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// The completion contract every wire dialect implements.
///
/// `complete` is infallible by design: whatever goes wrong ends up as a
/// `stop_reason` of `error` on the returned message, with zero usage.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this dialect (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Send the conversation and return the next assistant message with its
    /// turn usage attached.
    async fn complete(
        &self,
        conversation: &Conversation,
        params: &CompletionParams,
    ) -> AssistantMessage;
}

/// Instructions appended to every system prompt. The loop depends on each
/// reply carrying a tool call, and on secret placeholders surviving the
/// model's output verbatim.
pub(crate) fn wrap_system_prompt(base: &str) -> String {
    let mut prompt = String::new();
    if !base.is_empty() {
        prompt.push_str(base);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Every assistant reply must include a tool call; never reply without one. \
         State your intent and make the tool call in the same reply — do not split \
         them across separate messages. \
         Tokens of the form %NAME% are secret placeholders: repeat them verbatim \
         wherever a value is needed and never attempt to expand them.",
    );
    prompt
}

/// Recursively remove JSON-Schema fields a dialect rejects.
pub(crate) fn strip_schema_fields(schema: &Value, fields: &[&str]) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !fields.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), strip_schema_fields(value, fields)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| strip_schema_fields(item, fields))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub(crate) fn default_http_client() -> reqwest::Client {
    reqwest::Client::new()
}
