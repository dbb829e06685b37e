//! Status classification from the tail of a session log.
//!
//! ```text
//! Connecting -> Working -> {NeedsPermission, WaitingForInput} -> Working
//! ```
//!
//! The classifier is a pure function of a bounded slice of recent entries
//! and the permission policy. Whether a process is attached is applied
//! afterwards with [`Classification::without_process`].

use crate::log::{AssistantEntry, LogEntry};
use crate::permissions::PermissionChecker;
use crate::session::SessionStatus;
use std::collections::HashSet;

/// Result of classifying a log tail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub status: SessionStatus,
    /// First tool use awaiting approval, set only for `NeedsPermission`
    pub pending_tool_name: Option<String>,
}

impl Classification {
    fn of(status: SessionStatus) -> Self {
        Self {
            status,
            pending_tool_name: None,
        }
    }

    fn needs_permission(tool: &str) -> Self {
        Self {
            status: SessionStatus::NeedsPermission,
            pending_tool_name: Some(tool.to_string()),
        }
    }

    /// Applies the absence of a matched process.
    ///
    /// Nothing can be running without a process: `Working` and `Connecting`
    /// become `WaitingForInput`. A settled status stays frozen as the log
    /// left it, pending tool included.
    #[must_use]
    pub fn without_process(self) -> Self {
        match self.status {
            SessionStatus::Working | SessionStatus::Connecting => Self::of(SessionStatus::WaitingForInput),
            SessionStatus::NeedsPermission | SessionStatus::WaitingForInput => self,
        }
    }
}

/// Classifies a session from the tail of its log.
pub fn classify(entries: &[LogEntry], checker: &PermissionChecker) -> Classification {
    let conversation: Vec<&LogEntry> = entries.iter().filter(|e| e.is_conversational()).collect();

    let Some(last) = conversation.last() else {
        return Classification::of(SessionStatus::Connecting);
    };

    let group = last_assistant_message(&conversation);

    // A tool use is settled once a tool_result for it shows up
    let answered: HashSet<&str> = conversation
        .iter()
        .filter_map(|entry| match entry {
            LogEntry::User(user) => Some(user),
            _ => None,
        })
        .flat_map(|user| user.tool_result_ids())
        .collect();

    let tool_uses: Vec<_> = group
        .iter()
        .copied()
        .flat_map(AssistantEntry::tool_uses)
        .collect();
    let pending: Vec<_> = tool_uses
        .iter()
        .filter(|(id, _, _)| !answered.contains(id))
        .collect();

    if !pending.is_empty() {
        return match pending
            .iter()
            .find(|(_, name, input)| !checker.is_auto_approved(name, input))
        {
            Some((_, name, _)) => Classification::needs_permission(name),
            None => Classification::of(SessionStatus::Working),
        };
    }

    if matches!(last, LogEntry::User(_)) {
        return Classification::of(SessionStatus::Working);
    }

    let stop_reason = group
        .iter()
        .rev()
        .find_map(|entry| entry.message.stop_reason.as_deref());

    match stop_reason {
        None => Classification::of(SessionStatus::Working),
        Some("tool_use") if !tool_uses.is_empty() => Classification::of(SessionStatus::Working),
        Some(_) => Classification::of(SessionStatus::WaitingForInput),
    }
}

/// Returns the entries of the most recent assistant API message, in log order.
///
/// Streaming writes one entry per content block, so every entry carrying the
/// last assistant message id belongs to it.
fn last_assistant_message<'a>(conversation: &[&'a LogEntry]) -> Vec<&'a AssistantEntry> {
    let assistants: Vec<&AssistantEntry> = conversation
        .iter()
        .filter_map(|entry| match entry {
            LogEntry::Assistant(assistant) => Some(assistant),
            _ => None,
        })
        .collect();

    let Some(last) = assistants.last() else {
        return Vec::new();
    };

    match last.message.id.as_deref() {
        Some(id) => assistants
            .iter()
            .filter(|a| a.message.id.as_deref() == Some(id))
            .copied()
            .collect(),
        None => vec![*last],
    }
}
