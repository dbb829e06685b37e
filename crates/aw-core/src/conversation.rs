//! User-facing conversation extraction.
//!
//! Flattens log entries into the message list returned by `getConversation`:
//! one message per prompt, text block, thinking block, tool use and tool
//! result, in log order.

use crate::log::{ContentBlock, LogEntry, UserContent};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest tool result text kept per message.
const MAX_TOOL_RESULT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    User,
    Assistant,
    Thinking,
    ToolUse,
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub kind: MessageKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ConversationMessage {
    fn new(kind: MessageKind, text: impl Into<String>, timestamp: Option<&String>) -> Self {
        Self {
            kind,
            text: text.into(),
            tool_name: None,
            tool_input: None,
            is_error: false,
            timestamp: timestamp.cloned(),
        }
    }
}

/// Full conversation of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub session_id: SessionId,
    pub project_path: Option<String>,
    pub messages: Vec<ConversationMessage>,
}

/// Extracts display messages from parsed log entries.
///
/// Sidechain and meta entries are skipped, as are empty text blocks.
pub fn extract_messages(entries: &[LogEntry]) -> Vec<ConversationMessage> {
    let mut messages = Vec::new();

    for entry in entries.iter().filter(|e| e.is_conversational()) {
        match entry {
            LogEntry::User(user) => {
                if user.meta.is_meta.unwrap_or(false) {
                    continue;
                }
                let timestamp = user.meta.timestamp.as_ref();
                match &user.message.content {
                    UserContent::Text(text) => {
                        if !text.trim().is_empty() {
                            messages.push(ConversationMessage::new(MessageKind::User, text.trim(), timestamp));
                        }
                    }
                    UserContent::Blocks(blocks) => {
                        for block in blocks {
                            match block {
                                ContentBlock::Text { text } if !text.trim().is_empty() => {
                                    messages.push(ConversationMessage::new(MessageKind::User, text.trim(), timestamp));
                                }
                                ContentBlock::ToolResult {
                                    content, is_error, ..
                                } => {
                                    let mut msg = ConversationMessage::new(
                                        MessageKind::ToolResult,
                                        truncate(&tool_result_text(content), MAX_TOOL_RESULT_CHARS),
                                        timestamp,
                                    );
                                    msg.is_error = *is_error;
                                    messages.push(msg);
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
            LogEntry::Assistant(assistant) => {
                let timestamp = assistant.meta.timestamp.as_ref();
                for block in &assistant.message.content {
                    match block {
                        ContentBlock::Text { text } if !text.trim().is_empty() => {
                            messages.push(ConversationMessage::new(MessageKind::Assistant, text.trim(), timestamp));
                        }
                        ContentBlock::Thinking { thinking } if !thinking.trim().is_empty() => {
                            messages.push(ConversationMessage::new(MessageKind::Thinking, thinking.trim(), timestamp));
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            let mut msg = ConversationMessage::new(MessageKind::ToolUse, tool_summary(name, input), timestamp);
                            msg.tool_name = Some(name.clone());
                            msg.tool_input = Some(input.clone());
                            messages.push(msg);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    messages
}

/// One-line description of a tool use, e.g. `Bash: cargo test`.
pub fn tool_summary(name: &str, input: &Value) -> String {
    let detail = ["command", "file_path", "pattern", "url", "description", "path"]
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str));
    match detail {
        Some(detail) => format!("{name}: {detail}"),
        None => name.to_string(),
    }
}

/// Tool result content is either a string or a list of text blocks.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Truncates to at most `max` characters, appending an ellipsis when cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", text.get(..idx).unwrap_or(text)),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::parse_line;
    use serde_json::json;

    fn entries(lines: &[Value]) -> Vec<LogEntry> {
        lines.iter().map(|l| parse_line(&l.to_string()).unwrap()).collect()
    }

    #[test]
    fn test_extracts_in_log_order() {
        let log = entries(&[
            json!({"type": "user", "timestamp": "t0", "message": {"role": "user", "content": "Run the tests"}}),
            json!({"type": "assistant", "message": {"id": "m1", "content": [
                {"type": "thinking", "thinking": "Need cargo"},
                {"type": "text", "text": "Running them"},
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "cargo test"}}
            ]}}),
            json!({"type": "user", "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": "ok"}], "is_error": false}
            ]}}),
        ]);

        let messages = extract_messages(&log);
        let kinds: Vec<_> = messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::User,
                MessageKind::Thinking,
                MessageKind::Assistant,
                MessageKind::ToolUse,
                MessageKind::ToolResult
            ]
        );
        assert_eq!(messages[0].timestamp.as_deref(), Some("t0"));
        assert_eq!(messages[3].text, "Bash: cargo test");
        assert_eq!(messages[3].tool_name.as_deref(), Some("Bash"));
        assert_eq!(messages[4].text, "ok");
    }

    #[test]
    fn test_skips_meta_and_sidechain() {
        let log = entries(&[
            json!({"type": "user", "isMeta": true, "message": {"role": "user", "content": "caveat"}}),
            json!({"type": "user", "isSidechain": true, "message": {"role": "user", "content": "sub"}}),
            json!({"type": "user", "message": {"role": "user", "content": "real"}}),
        ]);
        let messages = extract_messages(&log);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "real");
    }

    #[test]
    fn test_message_kind_serialization() {
        let json = serde_json::to_string(&MessageKind::ToolResult).unwrap();
        assert_eq!(json, "\"toolResult\"");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
    }
}
