//! Per-log state kept across poll ticks.
//!
//! Each retained log has a [`LogState`]: a byte cursor so every tick only
//! parses what was appended, a bounded tail of recent entries for the
//! classifier, the metadata shown for the session, and the last status that
//! was classified from a healthy read. States of logs that drop out of the
//! snapshot are discarded.
//!
//! Reads for one tick run in parallel on the blocking pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use aw_core::conversation::truncate;
use aw_core::{classify, Classification, LogCursor, LogEntry, LogResult, PermissionChecker, Session, SessionId};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::discovery::AgentProcess;
use crate::matcher::LogFile;

/// Characters kept for `firstPrompt` and `latestMessage`.
const PREVIEW_CHARS: usize = 200;

// ============================================================================
// Filesystem
// ============================================================================

/// Lists session logs under `projects_dir`.
///
/// Sub-agent transcripts (`agent-*.jsonl`) are skipped. Blocking.
pub fn list_logs(projects_dir: &Path) -> Vec<LogFile> {
    let Ok(projects) = fs::read_dir(projects_dir) else {
        debug!(dir = %projects_dir.display(), "Projects directory not readable");
        return Vec::new();
    };

    let mut logs = Vec::new();
    for project in projects.flatten() {
        let project_path = project.path();
        if !project_path.is_dir() {
            continue;
        }
        let project_dir = project.file_name().to_string_lossy().into_owned();
        let Ok(files) = fs::read_dir(&project_path) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with("agent-") {
                continue;
            }
            let Ok(modified) = file.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            logs.push(LogFile {
                session_id: SessionId::new(stem),
                path: path.clone(),
                project_dir: project_dir.clone(),
                cwd: None,
                modified,
            });
        }
    }
    logs
}

/// True if `id` can safely name a log file.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Finds `<projects_dir>/*/<session_id>.jsonl`. Blocking.
pub fn find_session_log(projects_dir: &Path, session_id: &str) -> Option<PathBuf> {
    if !is_valid_session_id(session_id) {
        return None;
    }
    let file_name = format!("{session_id}.jsonl");
    fs::read_dir(projects_dir)
        .ok()?
        .flatten()
        .map(|project| project.path().join(&file_name))
        .find(|candidate| candidate.is_file())
}

// ============================================================================
// Per-log State
// ============================================================================

/// Incrementally maintained view of one session log.
#[derive(Debug, Clone)]
pub struct LogState {
    cursor: LogCursor,
    tail: VecDeque<LogEntry>,
    tail_capacity: usize,
    last_good: Option<Classification>,
    last_read_ok: bool,

    pub first_prompt: Option<String>,
    pub summary: Option<String>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
    pub latest_message: Option<String>,
    pub message_count: u64,
}

impl LogState {
    pub fn new(tail_capacity: usize) -> Self {
        Self {
            cursor: LogCursor::new(),
            tail: VecDeque::with_capacity(tail_capacity),
            tail_capacity: tail_capacity.max(1),
            last_good: None,
            last_read_ok: true,
            first_prompt: None,
            summary: None,
            git_branch: None,
            cwd: None,
            latest_message: None,
            message_count: 0,
        }
    }

    /// Reads what was appended since the last refresh.
    ///
    /// Returns the number of new entries. A file that shrank is reread from
    /// the start with all derived metadata cleared.
    pub fn refresh(&mut self, path: &Path) -> LogResult<usize> {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() < self.cursor.offset() {
                *self = Self::new(self.tail_capacity);
            }
        }

        let result = self.cursor.read_new(path).map(|entries| {
            let count = entries.len();
            entries.into_iter().for_each(|entry| self.absorb(entry));
            count
        });
        self.last_read_ok = result.is_ok();
        result
    }

    fn absorb(&mut self, entry: LogEntry) {
        match &entry {
            LogEntry::User(user) => {
                if let Some(prompt) = user.prompt_text() {
                    if self.first_prompt.is_none() {
                        self.first_prompt = Some(truncate(prompt, PREVIEW_CHARS));
                    }
                    self.latest_message = Some(truncate(prompt, PREVIEW_CHARS));
                }
            }
            LogEntry::Assistant(assistant) => {
                if let Some(text) = assistant.text() {
                    self.latest_message = Some(truncate(&text, PREVIEW_CHARS));
                }
            }
            LogEntry::Summary { summary } => {
                self.summary = Some(summary.clone());
            }
            LogEntry::Other => return,
        }

        if let Some(meta) = entry.meta() {
            if let Some(cwd) = &meta.cwd {
                self.cwd = Some(cwd.clone());
            }
            if let Some(branch) = meta.git_branch.as_ref().filter(|b| !b.is_empty()) {
                self.git_branch = Some(branch.clone());
            }
        }
        if entry.is_conversational() {
            self.message_count += 1;
        }

        if self.tail.len() == self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(entry);
    }

    /// Classifies the current tail.
    ///
    /// After a failed read the last status classified from a healthy read is
    /// returned instead.
    pub fn classify(&mut self, checker: &PermissionChecker) -> Classification {
        if !self.last_read_ok {
            return self.last_good.clone().unwrap_or_default();
        }
        let classification = classify(self.tail.make_contiguous(), checker);
        self.last_good = Some(classification.clone());
        classification
    }

    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }

    /// Builds this tick's session.
    pub fn to_session(
        &self,
        log: &LogFile,
        process: Option<&AgentProcess>,
        classification: Classification,
        custom_title: Option<String>,
        managed: bool,
    ) -> Session {
        let classification = if process.is_some() {
            classification
        } else {
            classification.without_process()
        };
        let project_path = process
            .map(|p| p.cwd.to_string_lossy().into_owned())
            .or_else(|| self.cwd.clone())
            .unwrap_or_else(|| log.project_dir.clone());

        Session {
            id: log.session_id.clone(),
            pid: process.map(|p| p.pid),
            status: classification.status,
            pending_tool_name: classification.pending_tool_name,
            project_path,
            git_branch: self.git_branch.clone(),
            first_prompt: self.first_prompt.clone(),
            summary: self.summary.clone(),
            custom_title,
            latest_message: self.latest_message.clone(),
            modified: DateTime::<Utc>::from(log.modified),
            message_count: self.message_count,
            managed,
        }
    }
}

// ============================================================================
// Index
// ============================================================================

/// All per-log states, keyed by log path.
#[derive(Debug)]
pub struct LogIndex {
    states: HashMap<PathBuf, LogState>,
    tail_entries: usize,
}

impl LogIndex {
    pub fn new(tail_entries: usize) -> Self {
        Self {
            states: HashMap::new(),
            tail_entries,
        }
    }

    /// Fills in the recorded working directory of logs read before.
    pub fn annotate(&self, logs: &mut [LogFile]) {
        for log in logs {
            if let Some(cwd) = self.states.get(&log.path).and_then(|s| s.cwd.clone()) {
                log.cwd = Some(cwd);
            }
        }
    }

    /// Refreshes the given logs in parallel and drops every other state.
    pub async fn refresh(&mut self, paths: &[PathBuf]) {
        let keep: HashSet<&PathBuf> = paths.iter().collect();
        self.states.retain(|path, _| keep.contains(path));

        let mut tasks = JoinSet::new();
        for path in paths {
            let mut state = self
                .states
                .remove(path)
                .unwrap_or_else(|| LogState::new(self.tail_entries));
            let path = path.clone();
            tasks.spawn_blocking(move || {
                if let Err(e) = state.refresh(&path) {
                    debug!(path = %path.display(), error = %e, "Log read failed, keeping last status");
                }
                (path, state)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, state)) => {
                    self.states.insert(path, state);
                }
                Err(e) => warn!(error = %e, "Log read task failed"),
            }
        }
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut LogState> {
        self.states.get_mut(path)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aw_core::SessionStatus;
    use std::io::Write;
    use std::time::SystemTime;

    const USER: &str = r#"{"type":"user","cwd":"/code/app","gitBranch":"main","message":{"role":"user","content":"fix the build"}}"#;
    const ASSISTANT_PENDING_BASH: &str = r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"make deploy"}}],"stop_reason":"tool_use"}}"#;
    const ASSISTANT_DONE: &str = r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"text","text":"Fixed."}],"stop_reason":"end_turn"}}"#;

    fn append(path: &Path, lines: &[&str]) {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn log_file(path: &Path) -> LogFile {
        LogFile {
            path: path.to_path_buf(),
            session_id: SessionId::new("S1"),
            project_dir: "-code-app".to_string(),
            cwd: None,
            modified: SystemTime::now(),
        }
    }

    #[test]
    fn test_list_logs_skips_agent_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-code-app");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("S1.jsonl"), "").unwrap();
        fs::write(project.join("agent-1.jsonl"), "").unwrap();
        fs::write(project.join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("stray.jsonl"), "").unwrap();

        let logs = list_logs(dir.path());
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].session_id.as_str(), "S1");
        assert_eq!(logs[0].project_dir, "-code-app");
    }

    #[test]
    fn test_find_session_log() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("-code-app");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("S1.jsonl"), "").unwrap();

        assert_eq!(find_session_log(dir.path(), "S1"), Some(project.join("S1.jsonl")));
        assert_eq!(find_session_log(dir.path(), "S2"), None);
        assert_eq!(find_session_log(dir.path(), "../S1"), None);
    }

    #[test]
    fn test_state_tracks_metadata_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER]);

        let mut state = LogState::new(10);
        assert_eq!(state.refresh(&path).unwrap(), 1);
        assert_eq!(state.first_prompt.as_deref(), Some("fix the build"));
        assert_eq!(state.cwd.as_deref(), Some("/code/app"));
        assert_eq!(state.git_branch.as_deref(), Some("main"));

        append(&path, &[ASSISTANT_DONE]);
        assert_eq!(state.refresh(&path).unwrap(), 1);
        assert_eq!(state.latest_message.as_deref(), Some("Fixed."));
        assert_eq!(state.message_count, 2);
        assert_eq!(state.refresh(&path).unwrap(), 0);
    }

    #[test]
    fn test_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER, USER, USER, USER, USER]);

        let mut state = LogState::new(3);
        state.refresh(&path).unwrap();
        assert_eq!(state.tail_len(), 3);
        assert_eq!(state.message_count, 5);
    }

    #[test]
    fn test_unparsed_read_keeps_last_good_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER, ASSISTANT_DONE]);

        let checker = PermissionChecker::default();
        let mut state = LogState::new(10);
        state.refresh(&path).unwrap();
        assert_eq!(state.classify(&checker).status, SessionStatus::WaitingForInput);

        append(&path, &["{not json", "also not json"]);
        assert!(state.refresh(&path).is_err());
        assert_eq!(state.classify(&checker).status, SessionStatus::WaitingForInput);
    }

    #[test]
    fn test_unparsed_first_read_is_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &["garbage"]);

        let mut state = LogState::new(10);
        assert!(state.refresh(&path).is_err());
        assert_eq!(state.classify(&PermissionChecker::default()).status, SessionStatus::Connecting);
    }

    #[test]
    fn test_truncated_log_resets_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER, ASSISTANT_DONE]);

        let mut state = LogState::new(10);
        state.refresh(&path).unwrap();
        fs::write(&path, "").unwrap();
        state.refresh(&path).unwrap();
        assert_eq!(state.message_count, 0);
        assert!(state.first_prompt.is_none());
    }

    #[test]
    fn test_session_without_process_is_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER]);

        let mut state = LogState::new(10);
        state.refresh(&path).unwrap();
        let classification = state.classify(&PermissionChecker::default());
        assert_eq!(classification.status, SessionStatus::Working);

        let session = state.to_session(&log_file(&path), None, classification, None, false);
        assert_eq!(session.status, SessionStatus::WaitingForInput);
        assert_eq!(session.pid, None);
        assert_eq!(session.project_path, "/code/app");
    }

    #[test]
    fn test_session_without_process_keeps_pending_tool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER, ASSISTANT_PENDING_BASH]);

        let mut state = LogState::new(10);
        state.refresh(&path).unwrap();
        let classification = state.classify(&PermissionChecker::default());
        assert_eq!(classification.status, SessionStatus::NeedsPermission);

        let session = state.to_session(&log_file(&path), None, classification, None, false);
        assert_eq!(session.status, SessionStatus::NeedsPermission);
        assert_eq!(session.pending_tool_name.as_deref(), Some("Bash"));
        assert_eq!(session.pid, None);
    }

    #[test]
    fn test_session_with_process_uses_process_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1.jsonl");
        append(&path, &[USER]);

        let mut state = LogState::new(10);
        state.refresh(&path).unwrap();
        let process = AgentProcess {
            pid: 7,
            cwd: PathBuf::from("/code/app"),
            start_time: 0,
        };
        let classification = state.classify(&PermissionChecker::default());
        let session = state.to_session(&log_file(&path), Some(&process), classification, Some("mine".into()), true);
        assert_eq!(session.pid, Some(7));
        assert_eq!(session.status, SessionStatus::Working);
        assert_eq!(session.display_title(), "mine");
        assert!(session.managed);
    }

    #[tokio::test]
    async fn test_index_refresh_retains_only_requested() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("A.jsonl");
        let b = dir.path().join("B.jsonl");
        append(&a, &[USER]);
        append(&b, &[USER]);

        let mut index = LogIndex::new(10);
        index.refresh(&[a.clone(), b.clone()]).await;
        assert_eq!(index.len(), 2);

        index.refresh(&[a.clone()]).await;
        assert_eq!(index.len(), 1);
        assert!(index.get_mut(&a).is_some());
        assert!(index.get_mut(&b).is_none());

        let mut logs = vec![log_file(&a)];
        index.annotate(&mut logs);
        assert_eq!(logs[0].cwd.as_deref(), Some("/code/app"));
    }
}
