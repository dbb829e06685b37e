//! Session matcher: pairs agent processes with session log files.
//!
//! Logs live under `<projects_dir>/<encoded-cwd>/<session-id>.jsonl`, where
//! the directory name is the session's working directory with every
//! character that is not ASCII alphanumeric replaced by `-`. A process is
//! matched to a log when its working directory equals the log's project
//! path (recorded `cwd` if known, otherwise the encoded directory name).
//!
//! When several processes share a project, the most recently started process
//! gets the most recently modified log, the next process the next log, and
//! so on. Each log gets at most one pid and each process at most one log.
//!
//! Both functions here are pure; the poller calls them every tick with fresh
//! inputs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use aw_core::SessionId;

use crate::discovery::AgentProcess;

/// A session log file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    /// File stem, the agent's session UUID
    pub session_id: SessionId,
    /// Name of the project directory the log sits in
    pub project_dir: String,
    /// Working directory recorded inside the log, once read
    pub cwd: Option<String>,
    pub modified: SystemTime,
}

impl LogFile {
    /// True when `dir` is this log's project directory.
    pub fn belongs_to(&self, dir: &Path) -> bool {
        match &self.cwd {
            Some(cwd) => Path::new(cwd) == dir,
            None => encode_project_path(dir) == self.project_dir,
        }
    }
}

/// A log retained for this tick, with its matched process if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub log: LogFile,
    pub process: Option<AgentProcess>,
}

/// Encodes a working directory the way the agent names project directories.
pub fn encode_project_path(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Matches processes to logs and decides which logs are reported.
///
/// A log is retained if it was matched to a process, is managed by the
/// bridge, or was modified within `recent_window` of `now`. Processes with no
/// log are dropped. The result is ordered most recently modified first.
pub fn match_sessions(
    processes: &[AgentProcess],
    logs: Vec<LogFile>,
    managed: &HashSet<SessionId>,
    now: SystemTime,
    recent_window: Duration,
) -> Vec<Match> {
    let mut logs = logs;
    logs.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));

    let mut processes: Vec<&AgentProcess> = processes.iter().collect();
    processes.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.pid.cmp(&b.pid)));

    // Log index -> process; logs are walked newest first for each process
    let mut assigned: HashMap<usize, &AgentProcess> = HashMap::new();
    for process in processes {
        let candidate = logs
            .iter()
            .enumerate()
            .find(|(idx, log)| !assigned.contains_key(idx) && log.belongs_to(&process.cwd));
        if let Some((idx, _)) = candidate {
            assigned.insert(idx, process);
        }
    }

    logs.into_iter()
        .enumerate()
        .filter_map(|(idx, log)| {
            let process = assigned.get(&idx).map(|p| (*p).clone());
            let recent = now
                .duration_since(log.modified)
                .map(|age| age <= recent_window)
                // Modified in the future counts as recent
                .unwrap_or(true);
            if process.is_some() || recent || managed.contains(&log.session_id) {
                Some(Match { log, process })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs_ago: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(100_000 - secs_ago)
    }

    fn now() -> SystemTime {
        at(0)
    }

    fn log(id: &str, project: &str, secs_ago: u64) -> LogFile {
        LogFile {
            path: PathBuf::from(format!("/p/{}/{id}.jsonl", encode_project_path(Path::new(project)))),
            session_id: SessionId::new(id),
            project_dir: encode_project_path(Path::new(project)),
            cwd: None,
            modified: at(secs_ago),
        }
    }

    fn process(pid: u32, cwd: &str, start_time: u64) -> AgentProcess {
        AgentProcess {
            pid,
            cwd: PathBuf::from(cwd),
            start_time,
        }
    }

    fn pid_of(matches: &[Match], id: &str) -> Option<u32> {
        matches
            .iter()
            .find(|m| m.log.session_id.as_str() == id)
            .and_then(|m| m.process.as_ref().map(|p| p.pid))
    }

    #[test]
    fn test_encode_project_path() {
        assert_eq!(encode_project_path(Path::new("/home/u/my.app")), "-home-u-my-app");
        assert_eq!(encode_project_path(Path::new("/srv/a_b")), "-srv-a-b");
    }

    #[test]
    fn test_recorded_cwd_wins_over_directory_name() {
        let mut l = log("S1", "/code/app", 10);
        l.cwd = Some("/code/app-v2".to_string());
        assert!(l.belongs_to(Path::new("/code/app-v2")));
        assert!(!l.belongs_to(Path::new("/code/app")));
    }

    #[test]
    fn test_single_match() {
        let matches = match_sessions(
            &[process(42, "/code/app", 1)],
            vec![log("S1", "/code/app", 5)],
            &HashSet::new(),
            now(),
            Duration::from_secs(900),
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(pid_of(&matches, "S1"), Some(42));
    }

    #[test]
    fn test_recency_tie_break() {
        // Newest process takes the newest log; the older process the next one
        let matches = match_sessions(
            &[process(1, "/code/app", 100), process(2, "/code/app", 200)],
            vec![log("OLD", "/code/app", 60), log("NEW", "/code/app", 5)],
            &HashSet::new(),
            now(),
            Duration::from_secs(900),
        );
        assert_eq!(pid_of(&matches, "NEW"), Some(2));
        assert_eq!(pid_of(&matches, "OLD"), Some(1));
    }

    #[test]
    fn test_extra_process_ignored_and_log_kept_without_pid() {
        let matches = match_sessions(
            &[process(7, "/elsewhere", 1)],
            vec![log("S1", "/code/app", 5)],
            &HashSet::new(),
            now(),
            Duration::from_secs(900),
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(pid_of(&matches, "S1"), None);
    }

    #[test]
    fn test_stale_unmatched_log_dropped_unless_managed() {
        let logs = vec![log("STALE", "/code/app", 5000), log("MANAGED", "/code/other", 5000)];
        let managed: HashSet<SessionId> = [SessionId::new("MANAGED")].into_iter().collect();
        let matches = match_sessions(&[], logs, &managed, now(), Duration::from_secs(900));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].log.session_id.as_str(), "MANAGED");
    }

    #[test]
    fn test_old_log_with_live_process_kept() {
        let matches = match_sessions(
            &[process(9, "/code/app", 1)],
            vec![log("IDLE", "/code/app", 86_400 - 1)],
            &HashSet::new(),
            now(),
            Duration::from_secs(900),
        );
        assert_eq!(pid_of(&matches, "IDLE"), Some(9));
    }

    #[test]
    fn test_ordered_newest_first() {
        let matches = match_sessions(
            &[],
            vec![log("A", "/a", 30), log("B", "/b", 10), log("C", "/c", 20)],
            &HashSet::new(),
            now(),
            Duration::from_secs(900),
        );
        let ids: Vec<_> = matches.iter().map(|m| m.log.session_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
    }
}
