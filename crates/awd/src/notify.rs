//! Fired notifications, remembered so a user action can find its session.

use std::collections::VecDeque;

use aw_core::{NotificationKind, NotificationMetadata, Session};
use aw_protocol::DeepLink;

/// Fixed-capacity ring of fired notifications.
///
/// Insertion order is eviction order: once full, each push drops the oldest
/// entry.
#[derive(Debug, Clone)]
pub struct NotificationRing {
    capacity: usize,
    entries: VecDeque<NotificationMetadata>,
}

impl NotificationRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Stores a notification, returning the evicted one if the ring was full.
    pub fn push(&mut self, metadata: NotificationMetadata) -> Option<NotificationMetadata> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(metadata);
        evicted
    }

    pub fn get(&self, notification_id: &str) -> Option<&NotificationMetadata> {
        self.entries.iter().find(|n| n.notification_id == notification_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &NotificationMetadata> {
        self.entries.iter()
    }
}

/// Builds the metadata for a transition, with a focus deep link appended to
/// the body when the session has a process.
pub fn build_notification(kind: NotificationKind, session: &Session, scheme: &str) -> NotificationMetadata {
    let mut metadata = NotificationMetadata::for_session(uuid::Uuid::new_v4().to_string(), kind, session);
    if let Some(pid) = session.pid {
        let link = DeepLink::new(pid, session.project_path.clone()).to_url(scheme);
        metadata.body = format!("{}\n{link}", metadata.body);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_core::{SessionId, SessionStatus};
    use chrono::Utc;

    fn metadata(id: &str) -> NotificationMetadata {
        NotificationMetadata {
            notification_id: id.to_string(),
            session_id: SessionId::new("S1"),
            pid: Some(1),
            project_path: "/code/app".to_string(),
            title: "t".to_string(),
            kind: NotificationKind::WorkComplete,
            body: String::new(),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut ring = NotificationRing::new(2);
        assert!(ring.push(metadata("n1")).is_none());
        assert!(ring.push(metadata("n2")).is_none());
        let evicted = ring.push(metadata("n3")).unwrap();
        assert_eq!(evicted.notification_id, "n1");
        assert_eq!(ring.len(), 2);
        assert!(ring.get("n1").is_none());
        assert!(ring.get("n3").is_some());
        let ids: Vec<_> = ring.iter().map(|n| n.notification_id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n3"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut ring = NotificationRing::new(0);
        ring.push(metadata("n1"));
        ring.push(metadata("n2"));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_build_notification_embeds_deep_link() {
        let session = Session {
            id: SessionId::new("S1"),
            pid: Some(4242),
            status: SessionStatus::NeedsPermission,
            pending_tool_name: Some("Bash".to_string()),
            project_path: "/code/my app".to_string(),
            git_branch: None,
            first_prompt: Some("fix it".to_string()),
            summary: None,
            custom_title: None,
            latest_message: None,
            modified: Utc::now(),
            message_count: 2,
            managed: false,
        };
        let n = build_notification(NotificationKind::PermissionNeeded, &session, "agentwatch");
        assert_eq!(n.session_id, session.id);
        assert!(n.body.starts_with("Bash is waiting for approval in my app"));

        let link = n.body.lines().last().unwrap();
        let parsed = DeepLink::parse(link, "agentwatch").unwrap();
        assert_eq!(parsed.pid, 4242);
        assert_eq!(parsed.project_path, "/code/my app");
    }
}
