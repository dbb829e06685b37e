//! Notification kinds and the metadata kept for fired notifications.

use crate::session::{Session, SessionId};
use serde::{Deserialize, Serialize};

/// Why a notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    /// Working -> NeedsPermission
    PermissionNeeded,
    /// Working -> WaitingForInput
    WorkComplete,
}

impl NotificationKind {
    pub fn title(&self) -> &'static str {
        match self {
            Self::PermissionNeeded => "Permission needed",
            Self::WorkComplete => "Work complete",
        }
    }
}

/// A fired notification, resolvable back to its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    pub notification_id: String,
    pub session_id: SessionId,
    pub pid: Option<u32>,
    pub project_path: String,
    pub title: String,
    pub kind: NotificationKind,
    /// Human-readable body; carries the deep link when one is configured
    pub body: String,
}

impl NotificationMetadata {
    /// Builds the metadata for a session that just made `kind`'s transition.
    pub fn for_session(notification_id: impl Into<String>, kind: NotificationKind, session: &Session) -> Self {
        let body = match kind {
            NotificationKind::PermissionNeeded => match session.pending_tool_name.as_deref() {
                Some(tool) => format!("{tool} is waiting for approval in {}", session.project_name()),
                None => format!("A tool is waiting for approval in {}", session.project_name()),
            },
            NotificationKind::WorkComplete => {
                format!("{} finished and is waiting for input", session.project_name())
            }
        };
        Self {
            notification_id: notification_id.into(),
            session_id: session.id.clone(),
            pid: session.pid,
            project_path: session.project_path.clone(),
            title: format!("{}: {}", kind.title(), session.display_title()),
            kind,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::Utc;

    fn session() -> Session {
        Session {
            id: SessionId::new("abc"),
            pid: Some(7),
            status: SessionStatus::NeedsPermission,
            pending_tool_name: Some("Bash".to_string()),
            project_path: "/code/widget".to_string(),
            git_branch: None,
            first_prompt: Some("ship it".to_string()),
            summary: None,
            custom_title: None,
            latest_message: None,
            modified: Utc::now(),
            message_count: 2,
            managed: false,
        }
    }

    #[test]
    fn test_permission_metadata() {
        let meta = NotificationMetadata::for_session("n1", NotificationKind::PermissionNeeded, &session());
        assert_eq!(meta.title, "Permission needed: ship it");
        assert_eq!(meta.body, "Bash is waiting for approval in widget");
        assert_eq!(meta.pid, Some(7));
    }

    #[test]
    fn test_serializes_camel_case() {
        let meta = NotificationMetadata::for_session("n1", NotificationKind::WorkComplete, &session());
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["notificationId"], "n1");
        assert_eq!(json["sessionId"], "abc");
        assert_eq!(json["projectPath"], "/code/widget");
        assert_eq!(json["kind"], "workComplete");
    }
}
