//! Conversation summarization — collapse prior turns into a single recap.
//!
//! When enabled, the view sent to the provider is reduced to two messages: a
//! synthetic user recap of everything before the most recent assistant
//! message, plus that message itself as the live tail. Per-tool persistent
//! state fragments survive the collapse; fragments owned by the live tail
//! are left out since the provider still sees them directly.

use std::collections::BTreeMap;

use lowire_core::{AssistantMessage, ContentPart, Conversation, Message};

/// Build the summarized message view for `conversation`.
///
/// With at most one assistant message there is nothing to collapse and the
/// original messages are returned unchanged.
pub fn summarize(task: &str, conversation: &Conversation) -> Vec<Message> {
    let assistant_count = conversation
        .messages
        .iter()
        .filter(|m| m.as_assistant().is_some())
        .count();
    if assistant_count <= 1 {
        return conversation.messages.clone();
    }

    let last_index = conversation
        .messages
        .iter()
        .rposition(|m| m.as_assistant().is_some())
        .expect("at least two assistant messages");

    let mut recap = format!("## Task\n{task}\n");
    let mut state: BTreeMap<String, String> = BTreeMap::new();
    let mut turn = 0usize;

    for (index, message) in conversation.messages.iter().enumerate() {
        let Some(assistant) = message.as_assistant() else {
            continue;
        };
        if index == last_index {
            break;
        }

        turn += 1;
        recap.push_str(&format!("\n### Turn {turn}\n"));
        render_turn(&mut recap, assistant, &mut state);
    }

    // The live tail's fragments stay with the tail.
    if let Some(Message::Assistant(last)) = conversation.messages.get(last_index) {
        for call in last.tool_calls() {
            if let Some(meta) = call.result.as_ref().and_then(|r| r.meta.as_ref()) {
                for name in meta.state.keys() {
                    state.remove(name);
                }
            }
        }
    }

    for (name, fragment) in &state {
        recap.push_str(&format!("\n### {name}\n{fragment}\n"));
    }

    let mut view = vec![Message::user(recap)];
    view.push(conversation.messages[last_index].clone());
    view
}

fn render_turn(recap: &mut String, assistant: &AssistantMessage, state: &mut BTreeMap<String, String>) {
    for part in &assistant.content {
        match part {
            ContentPart::Text(text) => {
                recap.push_str(&format!("[assistant] {}\n", text.text));
            }
            ContentPart::ToolCall(call) => {
                recap.push_str(&format!("[tool_call] {}({})\n", call.name, call.arguments));
                if let Some(result) = &call.result {
                    recap.push_str("[tool_result]\n");
                    let flattened = result.flattened_text();
                    if !flattened.is_empty() {
                        recap.push_str(&flattened);
                        recap.push('\n');
                    }
                    if let Some(meta) = &result.meta {
                        for item in &meta.history {
                            recap.push_str(&format!(
                                "<{0}>{1}</{0}>\n",
                                item.category, item.content
                            ));
                        }
                        for (name, fragment) in &meta.state {
                            state.insert(name.clone(), fragment.clone());
                        }
                    }
                }
            }
        }
    }
    if let Some(hint) = &assistant.tool_error {
        recap.push_str(&format!("[error] {hint}\n"));
    }
}
