//! The lowire agent loop — the heart of the runtime.
//!
//! The scheduler follows a **complete → dispatch → observe** cycle:
//!
//! 1. **Assemble** the conversation view (optionally summarized)
//! 2. **Complete** via the replay cache or the selected provider adapter
//! 3. **If tool calls**: dispatch them in declaration order through the
//!    caller's handler, folding results back into the conversation
//! 4. **Decide**: done signal, budget exhaustion, cancellation, or next turn
//!
//! The loop continues until a tool call lands with `_is_done = true` and a
//! non-error result, or a budget / turn limit is hit.

pub mod hooks;
pub mod loop_runner;
pub mod replay;
pub mod secrets;
pub mod summarizer;

pub use hooks::{HookDecision, LoopHooks};
pub use loop_runner::{Loop, RunOptions, RunOutcome, RunStatus};
pub use replay::{fingerprint, ReplayCache};
pub use secrets::{substitute_secrets, SecretStore};
pub use summarizer::summarize;
