//! Control loop: reads command lines, acks them, and launches turns.
//!
//! ```text
//! stdin ──lines──▶ Bridge::dispatch ──ack──▶ OutputSink ──▶ stdout
//!                        │                       ▲
//!                        └─spawn turn──▶ TurnSpawner (streamEvent / streamEnd)
//! ```
//!
//! Dispatch is sequential in arrival order and owns the session registry.
//! The ack for a send is queued before its turn task is spawned, so it is
//! always written ahead of that turn's first event.
//!
//! Turns of the same session run one at a time in acceptance order: each
//! turn waits for the previous turn's completion signal before spawning its
//! child. Turns of different sessions run concurrently.
//!
//! # Panic-Free Guarantees
//!
//! Every turn runs inside its own task watched by a supervisor. A panic in
//! a turn becomes a failed `streamEnd` for that turn and never stops the
//! loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aw_protocol::{BridgeCommand, BridgeMessage, BridgeRequest, RawCommand};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::output::{spawn_writer, OutputSink};
use crate::registry::SessionRegistry;
use crate::spawner::TurnSpawner;

/// Maximum control line size (1 MB)
const MAX_LINE_SIZE: usize = 1_048_576;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("I/O error on control channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output writer stopped: {0}")]
    Writer(String),
}

/// Bridge state owned by the control loop.
pub struct Bridge {
    registry: SessionRegistry,
    spawner: Arc<TurnSpawner>,
    sink: OutputSink,
    /// Completion signal of the most recently accepted turn per session
    last_turn: HashMap<String, oneshot::Receiver<()>>,
    turns: TaskTracker,
}

impl Bridge {
    pub fn new(spawner: TurnSpawner, sink: OutputSink) -> Self {
        Self {
            registry: SessionRegistry::new(),
            spawner: Arc::new(spawner),
            sink,
            last_turn: HashMap::new(),
            turns: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handles one raw input line.
    pub fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.len() > MAX_LINE_SIZE {
            warn!(size = line.len(), max = MAX_LINE_SIZE, "Ignoring oversized control line");
            return;
        }

        let raw: RawCommand = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed control line");
                return;
            }
        };

        let id = raw.id.clone();
        match BridgeRequest::try_from(raw) {
            Ok(request) => self.dispatch(request),
            Err(reason) => self.sink.send(BridgeMessage::ack_err(id, reason)),
        }
    }

    /// Applies one command.
    pub fn dispatch(&mut self, request: BridgeRequest) {
        let BridgeRequest { id, command } = request;
        match command {
            BridgeCommand::Resume { session_id, cwd } => {
                info!(session_id = %session_id, cwd = %cwd, "Session registered");
                self.registry.register(&session_id, cwd);
                self.sink.send(BridgeMessage::ack_ok(id));
            }

            BridgeCommand::Send {
                session_id,
                message,
                cwd,
            } => match self.registry.resolve_for_send(&session_id, cwd.as_deref()) {
                Ok(dir) => {
                    self.sink.send(BridgeMessage::ack_ok(id));
                    self.start_turn(session_id, message, dir);
                }
                Err(e) => self.sink.send(BridgeMessage::ack_err(id, e.to_string())),
            },

            BridgeCommand::Close { session_id } => {
                let known = self.registry.remove(&session_id);
                self.prune_finished_turns();
                debug!(session_id = %session_id, known, "Session closed");
                self.sink.send(BridgeMessage::ack_ok(id));
            }

            BridgeCommand::Unknown(cmd) => {
                self.sink
                    .send(BridgeMessage::ack_err(id, format!("Unknown command: {cmd}")));
            }
        }
    }

    /// Launches a supervised turn behind the session's previous turn.
    fn start_turn(&mut self, session_id: String, message: String, dir: PathBuf) {
        self.prune_finished_turns();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = self.last_turn.insert(session_id.clone(), done_rx);

        let ended = Arc::new(AtomicBool::new(false));
        let spawner = Arc::clone(&self.spawner);
        let sink = self.sink.clone();

        let turn = {
            let session_id = session_id.clone();
            let sink = sink.clone();
            let ended = Arc::clone(&ended);
            tokio::spawn(async move {
                // Dropped when this task ends, panics included
                let _done = done_tx;
                if let Some(previous) = previous {
                    let _ = previous.await;
                }

                let result = spawner.run_turn(&session_id, &message, &dir, &sink).await;
                if let Err(e) = &result {
                    warn!(session_id = %session_id, error = %e, "Turn failed");
                }
                ended.store(true, Ordering::SeqCst);
                sink.send(BridgeMessage::stream_end(session_id, result.map_err(|e| e.to_string())));
            })
        };

        self.turns.spawn(async move {
            if let Err(e) = turn.await {
                error!(session_id = %session_id, error = %e, "Turn task aborted");
                if !ended.swap(true, Ordering::SeqCst) {
                    sink.send(BridgeMessage::stream_end(
                        session_id,
                        Err(format!("Turn aborted: {e}")),
                    ));
                }
            }
        });
    }

    /// Forgets sessions whose last turn has ended. A still-running turn
    /// stays so the next send for its session queues behind it.
    fn prune_finished_turns(&mut self) {
        self.last_turn
            .retain(|_, done| matches!(done.try_recv(), Err(TryRecvError::Empty)));
    }

    /// Waits for every in-flight turn to finish.
    pub async fn drain(&self) {
        self.turns.close();
        self.turns.wait().await;
    }
}

/// Runs the bridge over a control channel until input EOF.
///
/// In-flight turns are allowed to finish and every queued line is written
/// before this returns.
pub async fn run_bridge<R, W>(reader: R, writer: W, spawner: TurnSpawner) -> Result<(), ControlError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sink, writer_task) = spawn_writer(writer);
    let mut bridge = Bridge::new(spawner, sink);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = match reader.read_line(&mut line).await {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(error = %e, "Ignoring control line that is not UTF-8");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if read == 0 {
            info!("Control channel closed");
            break;
        }
        bridge.handle_line(&line);
    }

    bridge.drain().await;
    drop(bridge);

    match writer_task.await {
        Ok(result) => result.map_err(ControlError::from),
        Err(e) => Err(ControlError::Writer(e.to_string())),
    }
}
