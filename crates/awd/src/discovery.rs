//! Process scanner: finds running agent processes.
//!
//! A scan is a pure snapshot: nothing is remembered between ticks. The OS is
//! behind the [`ProcessSource`] trait so the poll loop can be driven by a
//! fixed process list in tests.
//!
//! # Panic-Free Guarantees
//!
//! A process that disappears mid-scan or whose working directory cannot be
//! read is skipped, never an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during process discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Process scan failed: {0}")]
    Scan(String),

    #[error("Scan task failed: {0}")]
    Join(String),
}

/// A running process that looks like an agent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProcess {
    pub pid: u32,
    /// Current working directory
    pub cwd: PathBuf,
    /// Seconds since the epoch
    pub start_time: u64,
}

/// Source of process snapshots.
pub trait ProcessSource: Send + Sync {
    /// Returns every agent process currently running.
    ///
    /// Blocking; called from `spawn_blocking`.
    fn snapshot(&self) -> Result<Vec<AgentProcess>, DiscoveryError>;
}

/// Takes a snapshot on a blocking thread.
pub async fn scan(source: Arc<dyn ProcessSource>) -> Result<Vec<AgentProcess>, DiscoveryError> {
    tokio::task::spawn_blocking(move || source.snapshot())
        .await
        .map_err(|e| DiscoveryError::Join(e.to_string()))?
}

/// Reads the system process table through `sysinfo`.
#[derive(Debug, Clone)]
pub struct SystemProcessSource {
    signature: String,
}

impl SystemProcessSource {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

impl ProcessSource for SystemProcessSource {
    fn snapshot(&self) -> Result<Vec<AgentProcess>, DiscoveryError> {
        let mut system = System::new();
        let refresh = ProcessRefreshKind::nothing()
            .with_cwd(UpdateKind::Always)
            .with_exe(UpdateKind::Always)
            .with_cmd(UpdateKind::Always);
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let mut found = Vec::new();
        for (pid, process) in system.processes() {
            // Threads show up as processes on Linux; only keep the leader
            if process.thread_kind().is_some() {
                continue;
            }
            let name = process.name().to_string_lossy();
            let script = process.cmd().get(1).map(|arg| arg.to_string_lossy().into_owned());
            if !is_agent_process(&name, process.exe(), script.as_deref(), &self.signature) {
                continue;
            }
            let Some(cwd) = process.cwd() else {
                debug!(pid = pid.as_u32(), "Agent process without readable cwd, skipping");
                continue;
            };
            found.push(AgentProcess {
                pid: pid.as_u32(),
                cwd: cwd.to_path_buf(),
                start_time: process.start_time(),
            });
        }

        debug!(count = found.len(), "Process scan complete");
        Ok(found)
    }
}

/// Decides whether a process is an agent process.
///
/// Matches on the process name, the executable's file name, or an
/// executable living in a versioned install directory
/// (`~/.local/share/claude/versions/X.Y.Z`). A node-hosted agent is
/// recognised by its script argument.
pub fn is_agent_process(name: &str, exe: Option<&Path>, script: Option<&str>, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    if name == signature {
        return true;
    }
    if let Some(exe) = exe {
        if exe.file_name().and_then(|n| n.to_str()) == Some(signature) {
            return true;
        }
        let versioned = format!("{signature}/versions/");
        if exe.to_string_lossy().contains(&versioned) {
            return true;
        }
    }
    if name == "node" {
        if let Some(arg) = script {
            return Path::new(arg).file_name().and_then(|n| n.to_str()) == Some(signature);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_by_name() {
        assert!(is_agent_process("claude", None, None, "claude"));
        assert!(!is_agent_process("claude-helper", None, None, "claude"));
        assert!(!is_agent_process("bash", None, None, "claude"));
    }

    #[test]
    fn test_matches_by_exe() {
        assert!(is_agent_process(
            "2.0.14",
            Some(Path::new("/home/u/.local/share/claude/versions/2.0.14")),
            None,
            "claude"
        ));
        assert!(is_agent_process("cl", Some(Path::new("/usr/local/bin/claude")), None, "claude"));
        assert!(!is_agent_process("vim", Some(Path::new("/usr/bin/vim")), None, "claude"));
    }

    #[test]
    fn test_matches_node_script() {
        assert!(is_agent_process("node", None, Some("/usr/lib/node_modules/.bin/claude"), "claude"));
        assert!(!is_agent_process("node", None, Some("server.js"), "claude"));
    }

    #[test]
    fn test_empty_signature_matches_nothing() {
        assert!(!is_agent_process("", None, None, ""));
    }

    #[test]
    fn test_system_snapshot_runs() {
        // No agent is guaranteed to be running; only check it doesn't fail
        let source = SystemProcessSource::new("definitely-not-an-agent");
        assert!(source.snapshot().unwrap().is_empty());
    }
}
