//! Client side of the bridge control protocol.
//!
//! The daemon runs one `aw-bridge` child, spawned on first use and again
//! whenever the previous one has exited. Commands carry a fresh UUID; the
//! matching `ack` completes the caller's request. Stream output is
//! republished on the [`EventHub`] as `streamEvent` / `streamEnd` pushes.
//!
//! ```text
//! BridgeClient::send ──line──▶ aw-bridge stdin
//!        ▲                          │
//!        └── ack (by id) ◀── reader ◀── stdout ──▶ EventHub (stream pushes)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! A bridge that dies fails every request still waiting on it; the next
//! request spawns a new bridge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use aw_protocol::{BridgeMessage, BridgeRequest, RawCommand, ServerMessage};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::events::EventHub;

/// How long to wait for an ack
pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the bridge to exit on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to spawn bridge {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to bridge: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to encode bridge command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Bridge command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bridge exited before acknowledging")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}

type AckResult = Result<(), String>;
/// Waiters by request id; `None` once the bridge's output has closed
type PendingAcks = Arc<Mutex<Option<HashMap<String, oneshot::Sender<AckResult>>>>>;

/// One running bridge child.
struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
    /// Requests waiting for an ack from this child
    pending: PendingAcks,
}

pub struct BridgeClient {
    program: PathBuf,
    hub: EventHub,
    ack_timeout: Duration,
    process: Mutex<Option<BridgeProcess>>,
}

impl BridgeClient {
    pub fn new(program: impl Into<PathBuf>, hub: EventHub) -> Self {
        Self {
            program: program.into(),
            hub,
            ack_timeout: ACK_TIMEOUT,
            process: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Registers a session's working directory with the bridge.
    pub async fn resume(&self, session_id: &str, cwd: &str) -> Result<(), BridgeError> {
        self.request(BridgeRequest::resume(new_id(), session_id, cwd)).await
    }

    /// Starts a turn. Returns once the bridge has accepted it; the turn's
    /// output arrives later as pushes.
    pub async fn send(&self, session_id: &str, message: &str, cwd: Option<&str>) -> Result<(), BridgeError> {
        self.request(BridgeRequest::send(new_id(), session_id, message, cwd.map(str::to_string)))
            .await
    }

    pub async fn close(&self, session_id: &str) -> Result<(), BridgeError> {
        self.request(BridgeRequest::close(new_id(), session_id)).await
    }

    /// Sends one command and waits for its ack.
    pub async fn request(&self, request: BridgeRequest) -> Result<(), BridgeError> {
        let id = request.id.clone();
        let mut line = serde_json::to_string(&RawCommand::from(request))?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.process.lock().await;
            let process = self.ensure_running(&mut guard)?;
            let registered = match process.pending.lock().await.as_mut() {
                Some(waiting) => {
                    waiting.insert(id.clone(), tx);
                    true
                }
                None => false,
            };
            if !registered {
                *guard = None;
                return Err(BridgeError::Closed);
            }

            let written = async {
                process.stdin.write_all(line.as_bytes()).await?;
                process.stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                if let Some(waiting) = process.pending.lock().await.as_mut() {
                    waiting.remove(&id);
                }
                // Broken pipe: the child is gone or going, start over next time
                *guard = None;
                return Err(BridgeError::Write(e));
            }
        }

        debug!(id = %id, "Bridge command sent");
        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(BridgeError::Rejected(reason)),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                warn!(id = %id, "Bridge ack timed out");
                Err(BridgeError::Timeout(self.ack_timeout))
            }
        }
    }

    /// Returns the live bridge, spawning one if there is none.
    fn ensure_running<'a>(&self, slot: &'a mut Option<BridgeProcess>) -> Result<&'a mut BridgeProcess, BridgeError> {
        let process = match slot.take() {
            Some(mut process) => match process.child.try_wait() {
                Ok(None) => process,
                Ok(Some(status)) => {
                    info!(status = %status, "Bridge exited, respawning");
                    self.spawn()?
                }
                Err(e) => {
                    warn!(error = %e, "Failed to check bridge, respawning");
                    self.spawn()?
                }
            },
            None => self.spawn()?,
        };
        Ok(slot.insert(process))
    }

    fn spawn(&self) -> Result<BridgeProcess, BridgeError> {
        let spawn_error = |source| BridgeError::Spawn {
            program: self.program.display().to_string(),
            source,
        };
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("bridge stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("bridge stdout not captured")))?;

        info!(program = %self.program.display(), pid = ?child.id(), "Bridge started");

        let pending: PendingAcks = Arc::new(Mutex::new(Some(HashMap::new())));
        tokio::spawn(read_bridge_output(stdout, Arc::clone(&pending), self.hub.clone()));

        Ok(BridgeProcess { child, stdin, pending })
    }

    /// Closes the bridge's stdin and waits for it to exit.
    pub async fn shutdown(&self) {
        let Some(process) = self.process.lock().await.take() else {
            return;
        };
        let BridgeProcess { mut child, stdin, .. } = process;
        drop(stdin);
        match timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => info!(status = %status, "Bridge stopped"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for bridge"),
            Err(_) => {
                warn!("Bridge did not exit, killing");
                if let Err(e) = child.kill().await {
                    error!(error = %e, "Failed to kill bridge");
                }
            }
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Routes one bridge's stdout: acks to waiters, stream output to the hub.
async fn read_bridge_output(stdout: ChildStdout, pending: PendingAcks, hub: EventHub) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read bridge output");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let message: BridgeMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed bridge output line");
                continue;
            }
        };

        match message {
            BridgeMessage::Ack { id, success, error } => {
                let result = if success {
                    Ok(())
                } else {
                    Err(error.unwrap_or_else(|| "Unknown bridge error".to_string()))
                };
                let waiter = pending.lock().await.as_mut().and_then(|waiting| waiting.remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => debug!(id = %id, "Ack for unknown request"),
                }
            }
            other => {
                if let Some(push) = ServerMessage::from_bridge(other) {
                    hub.publish(push);
                }
            }
        }
    }

    // Dropping the senders fails every waiter with `Closed`
    let orphaned = pending.lock().await.take().map(|waiting| waiting.len()).unwrap_or(0);
    info!(orphaned, "Bridge output closed");
}
