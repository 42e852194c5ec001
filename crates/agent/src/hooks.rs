//! Event hooks — caller-supplied strategies invoked at the loop's yield
//! points.
//!
//! Every method is awaited; each await is a cancellation point. Errors are
//! caller errors and bubble out of `run` untouched. Only the two tool hooks
//! can veto: returning [`HookDecision::Disallow`] suppresses the call (or
//! its result) without aborting the run.

use async_trait::async_trait;

use lowire_core::{BoxError, Conversation, ToolCallPart, ToolResult};

/// Verdict of a vetoing hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookDecision {
    #[default]
    Allow,
    Disallow,
}

/// The strategy object holding all five hooks. Implement only what you
/// need; defaults are no-ops that allow everything.
#[async_trait]
pub trait LoopHooks: Send + Sync {
    async fn on_before_turn(&self, _conversation: &Conversation) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_after_turn(&self, _conversation: &Conversation) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_before_tool_call(&self, _call: &ToolCallPart) -> Result<HookDecision, BoxError> {
        Ok(HookDecision::Allow)
    }

    async fn on_after_tool_call(
        &self,
        _call: &ToolCallPart,
        _result: &ToolResult,
    ) -> Result<HookDecision, BoxError> {
        Ok(HookDecision::Allow)
    }

    async fn on_tool_call_error(
        &self,
        _call: &ToolCallPart,
        _error: &BoxError,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// The all-defaults hook set used when the caller supplies none.
pub(crate) struct NoopHooks;

#[async_trait]
impl LoopHooks for NoopHooks {}
