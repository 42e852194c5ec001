//! # Lowire Core
//!
//! Domain types, traits, and error definitions for the lowire agent runtime.
//! This crate has **zero wire-format dependencies** — it defines the canonical
//! conversation model that the scheduler and every provider adapter implement
//! against.
//!
//! ## Design Philosophy
//!
//! The conversation is a closed variant set (`Message`, `ContentPart`) that
//! adapters pattern-match over; the caller's tools plug in behind the
//! `ToolHandler` trait. Implementations live in their respective crates,
//! which enables:
//! - Swapping providers via the registry without touching the loop
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{BoxError, ProviderError, ToolError};
pub use message::{
    AssistantMessage, ContentPart, Conversation, HistoryItem, Message, StopReason, StopReasonCode,
    TextPart, ToolCallPart, ToolResult, ToolResultMeta, ToolResultPart, Usage, UserMessage,
};
pub use tool::{wrap_tools, Tool, ToolHandler, ToolInvocation, IS_DONE_PROPERTY};
