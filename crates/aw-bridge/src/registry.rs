//! Bridge-side session registry.
//!
//! Maps session id to the directory its turns run in. Owned by the control
//! loop and touched only from there, so no locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// What the bridge knows about a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSessionInfo {
    pub working_directory: PathBuf,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, BridgeSessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a session's working directory.
    pub fn register(&mut self, session_id: &str, working_directory: impl Into<PathBuf>) {
        self.sessions.insert(
            session_id.to_string(),
            BridgeSessionInfo {
                working_directory: working_directory.into(),
            },
        );
    }

    pub fn get(&self, session_id: &str) -> Option<&BridgeSessionInfo> {
        self.sessions.get(session_id)
    }

    /// Forgets a session. Returns whether it was registered.
    pub fn remove(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Resolves the directory for a send.
    ///
    /// A registered session keeps its registered directory. An unseen
    /// session is registered on the spot when the send carries a directory.
    pub fn resolve_for_send(&mut self, session_id: &str, cwd: Option<&str>) -> Result<PathBuf, RegistryError> {
        if let Some(info) = self.sessions.get(session_id) {
            return Ok(info.working_directory.clone());
        }
        match cwd {
            Some(cwd) => {
                self.register(session_id, Path::new(cwd));
                Ok(PathBuf::from(cwd))
            }
            None => Err(RegistryError::NotFound(session_id.to_string())),
        }
    }
}
