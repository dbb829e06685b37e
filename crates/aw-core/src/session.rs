//! Session entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a Claude Code session.
///
/// Wraps the session UUID (e.g., "8e11bfb5-7dc2-432b-9206-928fa5c35731"),
/// which is also the stem of the session's JSONL log file and the value
/// passed to `--resume` when continuing the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    ///
    /// Note: This does not validate UUID format. The log file name is
    /// owned by Claude Code, so we trust its format.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Current status of a session, derived from the tail of its log.
///
/// ```text
/// Connecting -> Working -> {NeedsPermission, WaitingForInput} -> Working -> ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SessionStatus {
    /// Process is running but the log is empty or not yet parseable.
    #[default]
    Connecting,

    /// Claude is generating, thinking, or running auto-approved tools.
    Working,

    /// A tool use is blocked on user approval.
    NeedsPermission,

    /// The assistant finished its turn and the session is idle.
    WaitingForInput,
}

impl SessionStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Working => "working",
            Self::NeedsPermission => "needs permission",
            Self::WaitingForInput => "waiting for input",
        }
    }

    /// Returns true if the user has to act for the session to proceed.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::NeedsPermission | Self::WaitingForInput)
    }

    /// Returns true for states that imply a live process.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Working)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Session Snapshot
// ============================================================================

/// One session as observed during a single poll tick.
///
/// Sessions are rebuilt from scratch every tick; the only identity they
/// carry across ticks is `id`, which is stable for as long as the log file
/// exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier (log file stem)
    pub id: SessionId,

    /// PID of the matched Claude process, if any
    pub pid: Option<u32>,

    /// Classified status
    pub status: SessionStatus,

    /// Tool awaiting approval; only set when status is NeedsPermission
    pub pending_tool_name: Option<String>,

    /// Working directory the session was started in
    pub project_path: String,

    /// Git branch recorded in the most recent log entry
    pub git_branch: Option<String>,

    /// First real user prompt in the session
    pub first_prompt: Option<String>,

    /// Summary line written by Claude Code on compaction
    pub summary: Option<String>,

    /// User-assigned title (renameSession)
    pub custom_title: Option<String>,

    /// Last user or assistant text, truncated
    pub latest_message: Option<String>,

    /// Last modification time of the log file
    pub modified: DateTime<Utc>,

    /// Number of user and assistant entries seen in the log
    pub message_count: u64,

    /// Whether the bridge has taken over this session
    pub managed: bool,
}

impl Session {
    /// Returns the title shown for this session.
    ///
    /// Preference order: custom title, summary, first prompt, session id.
    pub fn display_title(&self) -> &str {
        self.custom_title
            .as_deref()
            .or(self.summary.as_deref())
            .or(self.first_prompt.as_deref())
            .unwrap_or_else(|| self.id.short())
    }

    /// Returns the last path component of the project path.
    pub fn project_name(&self) -> &str {
        self.project_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.project_path)
    }
}
