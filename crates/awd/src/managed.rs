//! Sessions taken over by the bridge.
//!
//! Once a session is managed its original process has been stopped and new
//! turns run through `aw-bridge`. The poller keeps managed sessions in the
//! snapshot regardless of age, and every successful send touches the
//! session's log so the next tick sees it as recent.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use aw_core::SessionId;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::logindex::find_session_log;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSession {
    pub session_id: SessionId,
    pub project_path: String,
}

/// Shared set of managed sessions. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ManagedSessions {
    inner: Arc<RwLock<HashMap<SessionId, ManagedSession>>>,
}

impl ManagedSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: SessionId, project_path: impl Into<String>) {
        let entry = ManagedSession {
            session_id: session_id.clone(),
            project_path: project_path.into(),
        };
        self.inner.write().await.insert(session_id, entry);
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.inner.read().await.contains_key(session_id)
    }

    pub async fn project_path(&self, session_id: &SessionId) -> Option<String> {
        self.inner
            .read()
            .await
            .get(session_id)
            .map(|m| m.project_path.clone())
    }

    pub async fn ids(&self) -> HashSet<SessionId> {
        self.inner.read().await.keys().cloned().collect()
    }
}

/// Bumps the modification time of a session's log. Blocking.
///
/// Returns `false` if no log exists for the session.
pub fn touch_session_log(projects_dir: &Path, session_id: &str) -> bool {
    let Some(path) = find_session_log(projects_dir, session_id) else {
        warn!(session_id, "No log file to touch");
        return false;
    };
    let touched = OpenOptions::new()
        .append(true)
        .open(&path)
        .and_then(|file| file.set_modified(SystemTime::now()));
    match touched {
        Ok(()) => {
            debug!(path = %path.display(), "Touched session log");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to touch session log");
            false
        }
    }
}
