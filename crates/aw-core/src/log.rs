//! Claude Code session log model and incremental reader.
//!
//! Each session persists its activity to `~/.claude/projects/<encoded-cwd>/<session-id>.jsonl`,
//! one JSON object per line, append-only. We never write these files; the
//! reader only tracks a byte offset per file so that each poll tick parses
//! just the bytes appended since the last one.
//!
//! # Panic-Free Guarantees
//!
//! Lines that fail to parse are skipped. A line without its trailing newline
//! is held back as a partial and completed on the next read, so a writer
//! caught mid-line never produces a parse error.

use crate::error::{LogError, LogResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace};

// ============================================================================
// Entry Model
// ============================================================================

/// One line of a session log.
///
/// Only the entry types that matter for status and conversation display are
/// modeled; everything else (file-history snapshots, system entries, future
/// additions) deserializes as `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    User(UserEntry),
    Assistant(AssistantEntry),
    Summary {
        #[serde(default)]
        summary: String,
    },
    #[serde(other)]
    Other,
}

/// Fields shared by user and assistant entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    /// Injected context (command output, caveats) rather than a typed prompt
    #[serde(default)]
    pub is_meta: Option<bool>,
    /// Sub-agent traffic
    #[serde(default)]
    pub is_sidechain: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub message: UserMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: UserContent,
}

/// User content is either a plain prompt or a list of blocks (tool results,
/// images, text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantEntry {
    #[serde(flatten)]
    pub meta: EntryMeta,
    pub message: AssistantMessage,
}

/// An assistant API message.
///
/// Claude Code writes one log entry per content block while streaming, so a
/// single API message (one `id`) can span several consecutive entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// `None` while the message is still being generated
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// A content block inside a user or assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

impl LogEntry {
    /// Returns the shared metadata for user and assistant entries.
    pub fn meta(&self) -> Option<&EntryMeta> {
        match self {
            Self::User(user) => Some(&user.meta),
            Self::Assistant(assistant) => Some(&assistant.meta),
            _ => None,
        }
    }

    /// True for entries that are part of the main user/assistant exchange.
    ///
    /// Sidechain (sub-agent) entries are excluded.
    pub fn is_conversational(&self) -> bool {
        match self.meta() {
            Some(meta) => !meta.is_sidechain.unwrap_or(false),
            None => false,
        }
    }
}

impl UserEntry {
    /// Returns the prompt text if this entry is something the user typed.
    ///
    /// Tool results, meta entries and slash-command wrappers return `None`.
    pub fn prompt_text(&self) -> Option<&str> {
        if self.meta.is_meta.unwrap_or(false) {
            return None;
        }
        let text = match &self.message.content {
            UserContent::Text(text) => text.as_str(),
            UserContent::Blocks(blocks) => blocks.iter().find_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })?,
        };
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('<') {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Returns the tool_use ids answered by this entry.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        let blocks: &[ContentBlock] = match &self.message.content {
            UserContent::Blocks(blocks) => blocks,
            UserContent::Text(_) => &[],
        };
        blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }
}

impl AssistantEntry {
    /// Returns the concatenated text blocks of this entry.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Returns `(id, name, input)` for every tool use in this entry.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.message.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses a single log line.
pub fn parse_line(line: &str) -> LogResult<LogEntry> {
    Ok(serde_json::from_str(line)?)
}

/// Reads and parses every entry of a log file, skipping unparseable lines.
///
/// Used for conversation display, where the whole history is wanted. The
/// poll loop uses [`LogCursor`] instead.
pub fn read_all_entries(path: &Path) -> LogResult<Vec<LogEntry>> {
    let raw = std::fs::read(path).map_err(|e| LogError::io(path, e))?;
    let text = String::from_utf8_lossy(&raw);
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_line(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "Skipping unparseable log line");
                None
            }
        })
        .collect())
}

// ============================================================================
// Incremental Reader
// ============================================================================

/// Byte-offset cursor over an append-only log file.
#[derive(Debug, Clone, Default)]
pub struct LogCursor {
    offset: u64,
    partial: Vec<u8>,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Forgets everything read so far.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }

    /// Reads and parses the complete lines appended since the last call.
    ///
    /// If the file is now shorter than the cursor (truncated or replaced) the
    /// cursor restarts from the beginning. Returns `LogError::Unparsed` when
    /// new complete lines were read but not one of them parsed.
    pub fn read_new(&mut self, path: &Path) -> LogResult<Vec<LogEntry>> {
        let mut file = File::open(path).map_err(|e| LogError::io(path, e))?;
        let len = file.metadata().map_err(|e| LogError::io(path, e))?.len();

        if len < self.offset {
            debug!(path = %path.display(), len, offset = self.offset, "Log shrank, rereading from start");
            self.reset();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| LogError::io(path, e))?;
        let mut buf = Vec::new();
        let read = file
            .read_to_end(&mut buf)
            .map_err(|e| LogError::io(path, e))?;
        self.offset += read as u64;

        self.partial.extend_from_slice(&buf);
        let complete_len = match self.partial.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(Vec::new()),
        };
        let complete: Vec<u8> = self.partial.drain(..complete_len).collect();

        let text = String::from_utf8_lossy(&complete);
        let mut lines = 0usize;
        let mut entries = Vec::new();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            lines += 1;
            match parse_line(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    trace!(path = %path.display(), error = %e, "Skipping unparseable log line");
                }
            }
        }

        if lines > 0 && entries.is_empty() {
            return Err(LogError::Unparsed {
                path: path.to_path_buf(),
                lines,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const USER: &str = r#"{"type":"user","uuid":"u1","timestamp":"2026-02-06T12:00:00Z","cwd":"/home/me/proj","gitBranch":"main","sessionId":"s1","message":{"role":"user","content":"Fix the tests"}}"#;
    const ASSISTANT: &str = r#"{"type":"assistant","uuid":"a1","cwd":"/home/me/proj","message":{"id":"msg_1","model":"claude","role":"assistant","content":[{"type":"text","text":"On it"},{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"cargo test"}}],"stop_reason":"tool_use"}}"#;
    const RESULT: &str = r#"{"type":"user","uuid":"u2","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"ok"}]}}"#;

    #[test]
    fn test_parse_user_text() {
        let entry = parse_line(USER).unwrap();
        let LogEntry::User(user) = entry else {
            panic!("expected user entry");
        };
        assert_eq!(user.meta.cwd.as_deref(), Some("/home/me/proj"));
        assert_eq!(user.meta.git_branch.as_deref(), Some("main"));
        assert_eq!(user.prompt_text(), Some("Fix the tests"));
    }

    #[test]
    fn test_parse_assistant_tool_use() {
        let LogEntry::Assistant(assistant) = parse_line(ASSISTANT).unwrap() else {
            panic!("expected assistant entry");
        };
        assert_eq!(assistant.message.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(assistant.text().as_deref(), Some("On it"));
        let tools: Vec<_> = assistant.tool_uses().map(|(id, name, _)| (id, name)).collect();
        assert_eq!(tools, vec![("toolu_1", "Bash")]);
    }

    #[test]
    fn test_parse_tool_result_is_not_prompt() {
        let LogEntry::User(user) = parse_line(RESULT).unwrap() else {
            panic!("expected user entry");
        };
        assert_eq!(user.prompt_text(), None);
        assert_eq!(user.tool_result_ids().collect::<Vec<_>>(), vec!["toolu_1"]);
    }

    #[test]
    fn test_unknown_types_are_other() {
        let entry = parse_line(r#"{"type":"file-history-snapshot","messageId":"x"}"#).unwrap();
        assert_eq!(entry, LogEntry::Other);
        let block: ContentBlock = serde_json::from_str(r#"{"type":"image","source":{}}"#).unwrap();
        assert_eq!(block, ContentBlock::Other);
    }

    #[test]
    fn test_summary_entry() {
        let entry = parse_line(r#"{"type":"summary","summary":"Fixing tests","leafUuid":"x"}"#).unwrap();
        assert_eq!(
            entry,
            LogEntry::Summary {
                summary: "Fixing tests".to_string()
            }
        );
    }

    #[test]
    fn test_cursor_reads_only_appended_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{USER}").unwrap();
        file.flush().unwrap();

        let mut cursor = LogCursor::new();
        assert_eq!(cursor.read_new(file.path()).unwrap().len(), 1);
        assert!(cursor.read_new(file.path()).unwrap().is_empty());

        writeln!(file, "{ASSISTANT}").unwrap();
        writeln!(file, "{RESULT}").unwrap();
        file.flush().unwrap();
        assert_eq!(cursor.read_new(file.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_cursor_holds_partial_line() {
        let mut file = NamedTempFile::new().unwrap();
        let (head, tail) = USER.split_at(40);
        write!(file, "{head}").unwrap();
        file.flush().unwrap();

        let mut cursor = LogCursor::new();
        assert!(cursor.read_new(file.path()).unwrap().is_empty());

        writeln!(file, "{tail}").unwrap();
        file.flush().unwrap();
        let entries = cursor.read_new(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0], LogEntry::User(_)));
    }

    #[test]
    fn test_cursor_resets_on_truncation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{USER}").unwrap();
        writeln!(file, "{ASSISTANT}").unwrap();
        file.flush().unwrap();

        let mut cursor = LogCursor::new();
        assert_eq!(cursor.read_new(file.path()).unwrap().len(), 2);

        std::fs::write(file.path(), format!("{RESULT}\n")).unwrap();
        let entries = cursor.read_new(file.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_cursor_reports_unparsed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        file.flush().unwrap();

        let mut cursor = LogCursor::new();
        let result = cursor.read_new(file.path());
        assert!(matches!(result, Err(LogError::Unparsed { lines: 1, .. })));
    }

    #[test]
    fn test_read_all_skips_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{USER}").unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, "{ASSISTANT}").unwrap();
        file.flush().unwrap();

        assert_eq!(read_all_entries(file.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut cursor = LogCursor::new();
        let result = cursor.read_new(Path::new("/nonexistent/agent-watch/log.jsonl"));
        assert!(matches!(result, Err(LogError::Io { .. })));
    }
}
