//! The turn scheduler — advances a conversation under budgets, timeouts and
//! cancellation.
//!
//! Each turn: check budgets, assemble the view (optionally summarized),
//! complete via the replay cache or the live provider, fold the reply into
//! the conversation, then dispatch its tool calls sequentially in
//! declaration order. The run ends on a done signal (`_is_done = true` with
//! a non-error result), an exhausted budget, cancellation, or the turn
//! ceiling.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lowire_core::tool::{META_HISTORY, META_INTENT, META_KEY, META_STATE};
use lowire_core::{
    wrap_tools, AssistantMessage, BoxError, ContentPart, Conversation, Message, StopReasonCode,
    Tool, ToolCallPart, ToolHandler, ToolInvocation, ToolResult, Usage,
};
use lowire_providers::{Api, CompletionParams, Provider, ProviderRegistry, ReasoningEffort};

use crate::hooks::{HookDecision, LoopHooks, NoopHooks};
use crate::replay::{fingerprint, ReplayCache};
use crate::secrets::{substitute_secrets, SecretStore};
use crate::summarizer::summarize;

/// Hint appended when an assistant reply arrives without any tool call.
const TOOL_CALL_EXPECTED: &str = "Error: tool call is expected in every assistant message. \
     Call the \"report_result\" tool when the task is complete.";

/// Recognized run options. Anything the loop does not know about simply has
/// no field here.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: String,
    pub api: Api,
    pub api_key: String,
    pub api_endpoint: Option<String>,
    pub api_version: Option<String>,
    pub api_timeout: Option<Duration>,
    pub temperature: Option<f64>,
    pub reasoning: ReasoningEffort,

    /// Token budget for the whole run, spent by every turn's input + output.
    pub max_tokens: Option<i64>,

    pub system_prompt: String,
    pub tools: Vec<Tool>,

    pub max_turns: usize,
    pub max_tool_calls: Option<i64>,
    pub max_tool_call_retries: Option<i64>,

    /// Input replay cache; hits short-circuit the provider call.
    pub cache: ReplayCache,
    pub secrets: SecretStore,
    pub summarize: bool,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            model: String::new(),
            api: Api::default(),
            api_key: String::new(),
            api_endpoint: None,
            api_version: None,
            api_timeout: None,
            temperature: None,
            reasoning: ReasoningEffort::None,
            max_tokens: None,
            system_prompt: String::new(),
            tools: Vec::new(),
            max_turns: 100,
            max_tool_calls: None,
            max_tool_call_retries: None,
            cache: ReplayCache::new(),
            secrets: SecretStore::default(),
            summarize: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Final envelope of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,

    /// The done-signal tool result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub usage: Usage,
    pub turns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Break,
    Error,
}

/// Mutable per-run budget counters. `tokens` is checked with `<= 0` at the
/// top of a turn while `tool_calls` errors when the decrement goes below
/// zero; the asymmetry is intentional.
struct Budget {
    tokens: Option<i64>,
    tool_calls: Option<i64>,
    tool_call_retries: Option<i64>,
}

/// The agent loop bound to one provider and one set of options.
pub struct Loop {
    options: RunOptions,
    handler: Arc<dyn ToolHandler>,
    hooks: Arc<dyn LoopHooks>,
    provider: Arc<dyn Provider>,
    output: ReplayCache,
}

impl Loop {
    /// Create a loop resolving the adapter from the default registry.
    pub fn new(options: RunOptions, handler: Arc<dyn ToolHandler>) -> Self {
        let provider = ProviderRegistry::with_defaults()
            .get(options.api)
            .expect("default registry covers every dialect");
        Self {
            options,
            handler,
            hooks: Arc::new(NoopHooks),
            provider,
            output: ReplayCache::new(),
        }
    }

    /// Inject a specific provider instead of resolving by API tag.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = provider;
        self
    }

    /// Attach event hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn LoopHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// The completions recorded during the last run.
    pub fn replay_cache(&self) -> &ReplayCache {
        &self.output
    }

    /// Drive the conversation until the task completes or a limit is hit.
    ///
    /// Hook errors propagate as `Err`; every other failure is normalized
    /// into the returned envelope. Usage accumulated so far is always
    /// returned.
    pub async fn run(&mut self, task: &str) -> Result<RunOutcome, BoxError> {
        let mut conversation = Conversation::new(self.options.system_prompt.clone());
        conversation.tools = wrap_tools(&self.options.tools);
        conversation.push(Message::user(task));

        let mut usage = Usage::default();
        let mut turns = 0usize;
        let mut budget = Budget {
            tokens: self.options.max_tokens,
            tool_calls: self.options.max_tool_calls,
            tool_call_retries: self.options.max_tool_call_retries,
        };

        info!(model = %self.options.model, api = %self.options.api, "Starting run");

        for _ in 0..self.options.max_turns {
            if let Some(tokens) = budget.tokens {
                if tokens <= 0 {
                    return Ok(error_outcome(
                        format!(
                            "Budget tokens {} exhausted",
                            self.options.max_tokens.unwrap_or_default()
                        ),
                        usage,
                        turns,
                    ));
                }
            }

            let view = self.assemble_view(task, &conversation);

            let estimate = estimate_input_tokens(&view);
            let mut params = self.completion_params();
            if let Some(tokens) = budget.tokens {
                if estimate >= tokens {
                    return Ok(error_outcome(
                        format!("Input token estimate {estimate} exceeds budget {tokens}"),
                        usage,
                        turns,
                    ));
                }
                params.max_tokens = Some(tokens - estimate);
            }

            self.hooks.on_before_turn(&conversation).await?;
            if self.options.cancel.is_cancelled() {
                return Ok(break_outcome(usage, turns));
            }

            let message = self.complete_cached(&view, &params).await;
            if self.options.cancel.is_cancelled() {
                return Ok(break_outcome(usage, turns));
            }

            if let Some(reason) = &message.stop_reason {
                match reason.code {
                    StopReasonCode::Error => {
                        let error = reason
                            .message
                            .clone()
                            .unwrap_or_else(|| "Provider error".to_string());
                        return Ok(error_outcome(error, usage, turns));
                    }
                    StopReasonCode::MaxTokens => {
                        return Ok(error_outcome("Max tokens exhausted".into(), usage, turns));
                    }
                    StopReasonCode::Ok => {}
                }
            }

            usage.add(message.usage);
            if let Some(tokens) = budget.tokens.as_mut() {
                *tokens -= message.usage.total() as i64;
            }

            conversation.push(Message::Assistant(message));
            turns += 1;
            let message_index = conversation.messages.len() - 1;

            self.hooks.on_after_turn(&conversation).await?;
            if self.options.cancel.is_cancelled() {
                return Ok(break_outcome(usage, turns));
            }

            let (call_indices, intent) = {
                let appended = conversation.messages[message_index]
                    .as_assistant()
                    .expect("just appended an assistant message");
                let indices: Vec<usize> = appended
                    .content
                    .iter()
                    .enumerate()
                    .filter_map(|(index, part)| match part {
                        ContentPart::ToolCall(_) => Some(index),
                        ContentPart::Text(_) => None,
                    })
                    .collect();
                (indices, appended.text())
            };

            if call_indices.is_empty() {
                warn!(turns, "Assistant reply contained no tool call");
                if let Some(assistant) =
                    conversation.messages[message_index].as_assistant_mut()
                {
                    assistant.tool_error = Some(TOOL_CALL_EXPECTED.to_string());
                }
                continue;
            }

            let mut any_error = false;

            for part_index in call_indices {
                let call = match &conversation.messages[message_index] {
                    Message::Assistant(assistant) => match &assistant.content[part_index] {
                        ContentPart::ToolCall(call) => call.clone(),
                        ContentPart::Text(_) => continue,
                    },
                    Message::User(_) => continue,
                };

                if let Some(count) = budget.tool_calls.as_mut() {
                    *count -= 1;
                    if *count < 0 {
                        return Ok(error_outcome(
                            format!(
                                "Failed to perform step, max tool calls ({}) reached",
                                self.options.max_tool_calls.unwrap_or_default()
                            ),
                            usage,
                            turns,
                        ));
                    }
                }

                let decision = self.hooks.on_before_tool_call(&call).await?;
                if self.options.cancel.is_cancelled() {
                    return Ok(break_outcome(usage, turns));
                }
                if decision == HookDecision::Disallow {
                    attach_result(
                        &mut conversation,
                        message_index,
                        part_index,
                        ToolResult::error("Tool call is disallowed."),
                    );
                    any_error = true;
                    continue;
                }

                debug!(tool = %call.name, id = %call.id, "Dispatching tool call");
                let outcome = self.handler.call(self.invocation(&call, &intent)).await;
                if self.options.cancel.is_cancelled() {
                    return Ok(break_outcome(usage, turns));
                }

                let result = match outcome {
                    Ok(result) => match self.hooks.on_after_tool_call(&call, &result).await? {
                        HookDecision::Allow => result,
                        HookDecision::Disallow => {
                            ToolResult::error("Tool result is disallowed to be reported.")
                        }
                    },
                    Err(error) => {
                        warn!(tool = %call.name, %error, "Tool call failed");
                        self.hooks.on_tool_call_error(&call, &error).await?;
                        ToolResult::error(format!(
                            "Error while executing tool \"{}\": {}\n\nPlease try to recover and complete the task.",
                            call.name, error
                        ))
                    }
                };
                if self.options.cancel.is_cancelled() {
                    return Ok(break_outcome(usage, turns));
                }

                let is_error = result.is_error;
                attach_result(&mut conversation, message_index, part_index, result.clone());

                if is_error {
                    any_error = true;
                } else if call.is_done() {
                    info!(turns, "Done signal received");
                    return Ok(RunOutcome {
                        status: RunStatus::Ok,
                        result: Some(result),
                        error: None,
                        usage,
                        turns,
                    });
                }
            }

            if any_error {
                if let Some(retries) = budget.tool_call_retries.as_mut() {
                    *retries -= 1;
                    if *retries < 0 {
                        return Ok(error_outcome(
                            format!(
                                "Failed to perform action after {} tool call retries",
                                self.options.max_tool_call_retries.unwrap_or_default()
                            ),
                            usage,
                            turns,
                        ));
                    }
                }
            } else if let Some(max) = self.options.max_tool_call_retries {
                budget.tool_call_retries = Some(max);
            }
        }

        Ok(error_outcome(
            "Failed to perform step, max attempts reached".into(),
            usage,
            turns,
        ))
    }

    /// The conversation as sent to the provider this turn.
    fn assemble_view(&self, task: &str, conversation: &Conversation) -> Conversation {
        let messages = if self.options.summarize {
            summarize(task, conversation)
        } else {
            conversation.messages.clone()
        };
        Conversation {
            system_prompt: conversation.system_prompt.clone(),
            messages,
            tools: conversation.tools.clone(),
        }
    }

    /// Consult the input cache, then the output cache, then the provider.
    /// Every completion ends up in the output cache under its fingerprint.
    async fn complete_cached(
        &mut self,
        view: &Conversation,
        params: &CompletionParams,
    ) -> AssistantMessage {
        let key = fingerprint(view);

        if let Some(message) = self.options.cache.get(&key) {
            debug!(%key, "Replay cache hit");
            self.output.insert(key, &message);
            return message;
        }
        if let Some(message) = self.output.get(&key) {
            debug!(%key, "Replay cache hit (within run)");
            return message;
        }

        let message = self.provider.complete(view, params).await;
        self.output.insert(key, &message);
        message
    }

    fn completion_params(&self) -> CompletionParams {
        CompletionParams {
            model: self.options.model.clone(),
            api_key: self.options.api_key.clone(),
            endpoint: self.options.api_endpoint.clone(),
            api_version: self.options.api_version.clone(),
            timeout: self.options.api_timeout,
            temperature: self.options.temperature,
            reasoning: self.options.reasoning,
            max_tokens: None,
            cancel: self.options.cancel.clone(),
        }
    }

    /// Arguments handed to the tool handler: secrets substituted, reserved
    /// `_meta` keys injected.
    fn invocation(&self, call: &ToolCallPart, intent: &str) -> ToolInvocation {
        let mut arguments = substitute_secrets(&call.arguments, &self.options.secrets);
        if let Value::Object(map) = &mut arguments {
            map.insert(
                META_KEY.to_string(),
                json!({
                    META_INTENT: intent,
                    META_HISTORY: true,
                    META_STATE: true,
                }),
            );
        }
        ToolInvocation {
            name: call.name.clone(),
            arguments,
        }
    }
}

/// Cheap input-size estimate: a quarter of the serialized byte length. An
/// intentional under-approximation used only for budget decisions.
fn estimate_input_tokens(view: &Conversation) -> i64 {
    let serialized =
        serde_json::to_string(view).expect("conversation serialization is infallible");
    (serialized.len() / 4) as i64
}

fn attach_result(
    conversation: &mut Conversation,
    message_index: usize,
    part_index: usize,
    result: ToolResult,
) {
    if let Some(assistant) = conversation.messages[message_index].as_assistant_mut() {
        if let Some(ContentPart::ToolCall(call)) = assistant.content.get_mut(part_index) {
            call.result = Some(result);
        }
    }
}

fn error_outcome(error: String, usage: Usage, turns: usize) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Error,
        result: None,
        error: Some(error),
        usage,
        turns,
    }
}

fn break_outcome(usage: Usage, turns: usize) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Break,
        result: None,
        error: None,
        usage,
        turns,
    }
}
