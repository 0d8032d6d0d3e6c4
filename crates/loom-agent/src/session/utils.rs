use crate::Turn;
use loom_llm::{Message, Role, ToolCall};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const INTERRUPTED_TOOL_RESULT: &str =
    "the task was cancelled before this tool call completed";

pub(crate) fn current_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis().to_string()
}

/// Rebuilds the backend conversation from stored turns. Tool requests join
/// the assistant message that issued them; requests without a recorded
/// result get a placeholder so the conversation stays well formed.
pub(crate) fn history_to_messages(history: &[Turn]) -> Vec<Message> {
    let mut messages: Vec<Message> = Vec::new();
    let mut open_calls: Vec<String> = Vec::new();

    for turn in history {
        match turn {
            Turn::User { content, .. } => {
                close_open_calls(&mut messages, &mut open_calls);
                messages.push(Message::user(content.clone()));
            }
            Turn::Assistant { content, .. } => {
                close_open_calls(&mut messages, &mut open_calls);
                messages.push(Message::assistant(content.clone()));
            }
            Turn::ToolRequest {
                call_id,
                tool_name,
                arguments,
                raw_arguments,
                ..
            } => {
                let mut call = ToolCall::new(call_id.clone(), tool_name.clone(), arguments.clone());
                call.raw_arguments = raw_arguments.clone();
                match messages.last_mut() {
                    Some(last) if last.role == Role::Assistant => last.tool_calls.push(call),
                    _ => messages.push(Message::assistant_with_tool_calls("", vec![call])),
                }
                open_calls.push(call_id.clone());
            }
            Turn::ToolResult {
                call_id, content, ..
            } => {
                open_calls.retain(|open| open != call_id);
                messages.push(Message::tool_result(call_id.clone(), content.clone()));
            }
        }
    }
    close_open_calls(&mut messages, &mut open_calls);
    messages
}

fn close_open_calls(messages: &mut Vec<Message>, open_calls: &mut Vec<String>) {
    for call_id in open_calls.drain(..) {
        messages.push(Message::tool_result(call_id, INTERRUPTED_TOOL_RESULT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_llm::Usage;
    use serde_json::json;

    fn user(text: &str) -> Turn {
        Turn::User {
            content: text.to_string(),
            timestamp: "t".to_string(),
        }
    }

    fn assistant(text: &str) -> Turn {
        Turn::Assistant {
            content: text.to_string(),
            usage: Usage::default(),
            response_id: None,
            timestamp: "t".to_string(),
        }
    }

    fn request(call_id: &str, sequence_no: u64) -> Turn {
        Turn::ToolRequest {
            call_id: call_id.to_string(),
            sequence_no,
            tool_name: "Glob".to_string(),
            arguments: json!({ "pattern": "*" }),
            raw_arguments: None,
            timestamp: "t".to_string(),
        }
    }

    fn result(call_id: &str, sequence_no: u64) -> Turn {
        Turn::ToolResult {
            call_id: call_id.to_string(),
            sequence_no,
            tool_name: "Glob".to_string(),
            content: format!("output of {call_id}"),
            is_error: false,
            denied: false,
            timestamp: "t".to_string(),
        }
    }

    #[test]
    fn tool_requests_attach_to_the_issuing_assistant_message() {
        let history = vec![
            user("list"),
            assistant("looking"),
            request("a", 1),
            request("b", 2),
            result("a", 1),
            result("b", 2),
            assistant("done"),
        ];
        let messages = history_to_messages(&history);
        let roles: Vec<Role> = messages.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(messages[1].tool_calls.len(), 2);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("a"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("b"));
    }

    #[test]
    fn unanswered_requests_get_a_placeholder_result() {
        let history = vec![user("list"), assistant(""), request("a", 1), user("again")];
        let messages = history_to_messages(&history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Tool);
        assert_eq!(messages[2].content, INTERRUPTED_TOOL_RESULT);
        assert_eq!(messages[3].role, Role::User);
    }
}
