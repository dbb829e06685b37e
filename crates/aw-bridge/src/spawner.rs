//! Turn spawner: one agent child process per turn.
//!
//! A turn runs `claude -p <message> --resume <session> --output-format
//! stream-json --verbose` in the session's directory. Every stdout line that
//! parses as JSON is forwarded as a `streamEvent`; the final `result` line
//! (or, failing that, the exit status) decides the turn's outcome.
//!
//! # Panic-Free Guarantees
//!
//! Spawn and I/O failures come back as [`SpawnError`] and end the turn with
//! a failed `streamEnd`; they never reach the control loop.

use std::collections::VecDeque;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use aw_protocol::BridgeMessage;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::output::OutputSink;

/// Lines of agent stderr kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Agent executable not found: {0}")]
    NotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error reading agent output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent reported failure: {0}")]
    Failed(String),

    #[error("Agent exited with {status}{detail}")]
    Exit { status: String, detail: String },
}

/// Resolves an executable name to an absolute path.
///
/// Names containing a path separator are checked as given; bare names are
/// searched on `PATH`.
pub fn resolve_executable(name: &str) -> Result<PathBuf, SpawnError> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return if candidate.is_file() {
            Ok(candidate.canonicalize().unwrap_or_else(|_| candidate.to_path_buf()))
        } else {
            Err(SpawnError::NotFound(name.to_string()))
        };
    }

    let path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| is_executable(full))
        .ok_or_else(|| SpawnError::NotFound(name.to_string()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Returns `requested` if it is an existing directory, else `fallback`.
pub fn resolve_cwd(requested: &Path, fallback: &Path) -> PathBuf {
    if requested.is_dir() {
        requested.to_path_buf()
    } else {
        warn!(
            requested = %requested.display(),
            fallback = %fallback.display(),
            "Working directory does not exist, falling back"
        );
        fallback.to_path_buf()
    }
}

/// Builds and runs agent turns.
#[derive(Debug, Clone)]
pub struct TurnSpawner {
    /// Executable name or path, resolved on every spawn
    agent: String,
    /// Directory used when a session's directory has gone away
    fallback_dir: PathBuf,
    /// Added on top of the inherited environment
    env_overrides: Vec<(OsString, OsString)>,
}

impl TurnSpawner {
    pub fn new(agent: impl Into<String>, fallback_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent: agent.into(),
            fallback_dir: fallback_dir.into(),
            env_overrides: Vec::new(),
        }
    }

    /// Adds an environment override. Overrides win over inherited values.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env_overrides.push((key.into(), value.into()));
        self
    }

    pub fn fallback_dir(&self) -> &Path {
        &self.fallback_dir
    }

    /// Builds the command for one turn.
    ///
    /// The child inherits this process's environment with the overrides
    /// applied on top; the environment is never cleared.
    pub fn command(&self, session_id: &str, message: &str, cwd: &Path) -> Result<Command, SpawnError> {
        let program = resolve_executable(&self.agent)?;
        let cwd = resolve_cwd(cwd, &self.fallback_dir);

        let mut command = Command::new(&program);
        command
            .arg("-p")
            .arg(message)
            .arg("--resume")
            .arg(session_id)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .current_dir(cwd)
            .envs(self.env_overrides.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }

    /// Runs one turn to completion, streaming its output to `sink`.
    ///
    /// Does not emit `streamEnd`; the caller does, exactly once, from the
    /// returned outcome.
    pub async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        cwd: &Path,
        sink: &OutputSink,
    ) -> Result<(), SpawnError> {
        let mut command = self.command(session_id, message, cwd)?;
        let mut child = command.spawn().map_err(|source| SpawnError::Spawn {
            program: self.agent.clone(),
            source,
        })?;

        info!(session_id, pid = ?child.id(), "Turn started");

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "aw_bridge::agent_stderr", "{line}");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let mut outcome: Option<Result<(), SpawnError>> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let data: Value = match serde_json::from_str(&line) {
                    Ok(data) => data,
                    Err(_) => {
                        debug!(session_id, "Skipping non-JSON agent output line");
                        continue;
                    }
                };
                if data.get("type").and_then(Value::as_str) == Some("result") {
                    outcome = Some(result_outcome(&data));
                }
                sink.send(BridgeMessage::stream_event(session_id, data));
            }
        }

        let status = child.wait().await?;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        info!(session_id, status = %status, "Turn finished");

        match outcome {
            Some(outcome) => outcome,
            None if status.success() => Ok(()),
            None => Err(SpawnError::Exit {
                status: status.to_string(),
                detail: if stderr_tail.is_empty() {
                    String::new()
                } else {
                    format!(": {stderr_tail}")
                },
            }),
        }
    }
}

/// Interprets the agent's final `{"type":"result",...}` line.
fn result_outcome(data: &Value) -> Result<(), SpawnError> {
    let subtype = data.get("subtype").and_then(Value::as_str).unwrap_or_default();
    let is_error = data.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    if subtype == "success" && !is_error {
        return Ok(());
    }
    let reason = data
        .get("result")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .unwrap_or(if subtype.is_empty() { "error" } else { subtype });
    Err(SpawnError::Failed(reason.to_string()))
}
