//! Error types for the lowire domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own enum; caller-supplied code (hooks, tool handlers) reports
//! arbitrary errors through the boxed alias.

use thiserror::Error;

/// Errors originating in caller-supplied callbacks. Hook errors propagate
/// out of the run untouched; tool-handler errors are folded into an error
/// `ToolResult` instead.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures while talking to an LLM backend. Adapters normalize these into
/// an error stop reason rather than surfacing them to the loop.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Provider returned no candidates")]
    EmptyCandidates,

    /// Transport-layer failure. Carries the gateway's message verbatim so
    /// fixed texts like `"Fetch timeout after <ms>ms"` survive unchanged.
    #[error("{0}")]
    Transport(String),
}

/// Failures of a single tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
