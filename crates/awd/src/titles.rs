//! Custom session titles set through `renameSession`.
//!
//! Stored as a flat JSON object `{ "<session-id>": "<title>" }`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use aw_core::SessionId;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct TitleStore {
    path: PathBuf,
    titles: HashMap<String, String>,
}

impl TitleStore {
    /// Loads the store; a missing or unreadable file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let titles = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Malformed titles file, starting empty");
                HashMap::new()
            }),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No titles file");
                HashMap::new()
            }
        };
        Self { path, titles }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&str> {
        self.titles.get(session_id.as_str()).map(String::as_str)
    }

    /// Sets a title; a blank title clears it.
    pub fn set(&mut self, session_id: &SessionId, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            self.titles.remove(session_id.as_str());
        } else {
            self.titles.insert(session_id.to_string(), title.to_string());
        }
    }

    /// Writes the store, replacing the file atomically.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.titles).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
