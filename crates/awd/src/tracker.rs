//! Transition tracker: turns status snapshots into notification edges.
//!
//! The tracker remembers the status each session had on the previous tick.
//! A session seen for the first time is only recorded. After that, a
//! notification fires on exactly two edges:
//!
//! | previous  | current         | fires              |
//! |-----------|-----------------|--------------------|
//! | Working   | NeedsPermission | `PermissionNeeded` |
//! | Working   | WaitingForInput | `WorkComplete`     |
//!
//! Sessions missing from a snapshot are forgotten without a notification,
//! so a session that comes back is seeded again.
//!
//! The tracker is owned by the poll loop and never shared.

use std::collections::{HashMap, HashSet};

use aw_core::{NotificationKind, Session, SessionId, SessionStatus};
use tracing::info;

/// A status change that should be notified.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub kind: NotificationKind,
    pub session: Session,
}

#[derive(Debug, Default)]
pub struct TransitionTracker {
    previous: HashMap<SessionId, SessionStatus>,
}

impl TransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares one snapshot with the previous one.
    pub fn observe(&mut self, sessions: &[Session]) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for session in sessions {
            let Some(prev) = self.previous.insert(session.id.clone(), session.status) else {
                continue;
            };
            let kind = match (prev, session.status) {
                (SessionStatus::Working, SessionStatus::NeedsPermission) => NotificationKind::PermissionNeeded,
                (SessionStatus::Working, SessionStatus::WaitingForInput) => NotificationKind::WorkComplete,
                _ => continue,
            };
            info!(
                session_id = %session.id,
                from = %prev,
                to = %session.status,
                "Session transition"
            );
            transitions.push(Transition {
                kind,
                session: session.clone(),
            });
        }

        let current: HashSet<&SessionId> = sessions.iter().map(|s| &s.id).collect();
        self.previous.retain(|id, _| current.contains(id));

        transitions
    }

    /// Last recorded status of a session.
    pub fn previous(&self, id: &SessionId) -> Option<SessionStatus> {
        self.previous.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn session(id: &str, status: SessionStatus) -> Session {
        Session {
            id: SessionId::new(id),
            pid: Some(1),
            status,
            pending_tool_name: None,
            project_path: "/code/app".to_string(),
            git_branch: None,
            first_prompt: None,
            summary: None,
            custom_title: None,
            latest_message: None,
            modified: Utc::now(),
            message_count: 0,
            managed: false,
        }
    }

    #[test]
    fn test_first_sight_only_seeds() {
        let mut tracker = TransitionTracker::new();
        assert!(tracker.observe(&[session("A", SessionStatus::NeedsPermission)]).is_empty());
        assert_eq!(tracker.previous(&SessionId::new("A")), Some(SessionStatus::NeedsPermission));
    }

    #[test]
    fn test_work_complete_edge() {
        let mut tracker = TransitionTracker::new();
        tracker.observe(&[session("A", SessionStatus::Working)]);
        let fired = tracker.observe(&[session("A", SessionStatus::WaitingForInput)]);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, NotificationKind::WorkComplete);
    }

    #[test]
    fn test_connecting_to_waiting_does_not_fire() {
        let mut tracker = TransitionTracker::new();
        tracker.observe(&[session("A", SessionStatus::Connecting)]);
        assert!(tracker.observe(&[session("A", SessionStatus::WaitingForInput)]).is_empty());
    }

    #[test]
    fn test_disappearance_is_silent() {
        let mut tracker = TransitionTracker::new();
        tracker.observe(&[session("A", SessionStatus::Working), session("B", SessionStatus::Working)]);
        assert!(tracker.observe(&[session("B", SessionStatus::Working)]).is_empty());
        assert_eq!(tracker.previous(&SessionId::new("A")), None);
        assert_eq!(tracker.len(), 1);
    }
}
