//! agent-watch core - shared types for Claude Code session monitoring
//!
//! This crate provides the domain types shared between the daemon (`awd`)
//! and the turn bridge (`aw-bridge`):
//! - `log` - JSONL session log model and incremental reader
//! - `classify` - status classification from a bounded log tail
//! - `permissions` - tool auto-approval policy
//! - `conversation` - user-facing message extraction
//! - `notification` - notification kinds and metadata
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod classify;
pub mod conversation;
pub mod error;
pub mod log;
pub mod notification;
pub mod permissions;
pub mod session;

// Re-exports for convenience
pub use classify::{classify, Classification};
pub use conversation::{extract_messages, Conversation, ConversationMessage, MessageKind};
pub use error::{LogError, LogResult};
pub use log::{
    parse_line, read_all_entries, AssistantEntry, AssistantMessage, ContentBlock, EntryMeta,
    LogCursor, LogEntry, UserContent, UserEntry, UserMessage,
};
pub use notification::{NotificationKind, NotificationMetadata};
pub use permissions::PermissionChecker;
pub use session::{Session, SessionId, SessionStatus};
