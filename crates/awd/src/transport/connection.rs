//! Connection handler for one socket client.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs the token and protocol version handshake
//! - Answers requests in the order they arrive
//! - Forwards every hub push to the client while connected
//!
//! Requests and pushes share one writer, so each line is written whole.
//!
//! # Panic-Free Guarantees
//!
//! Malformed requests get an `error` response and the connection stays
//! open. I/O failures end this connection only.

use std::sync::Arc;
use std::time::Duration;

use aw_protocol::{ClientRequest, Handshake, ProtocolVersion, ServerMessage, VersionError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::service::Dispatcher;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Time allowed for the first frame
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

pub struct ConnectionHandler<R, W> {
    reader: BufReader<R>,
    writer: SharedWriter<W>,
    dispatcher: Dispatcher,
    token: Arc<str>,
    client_id: Option<String>,
    connection_number: u64,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, dispatcher: Dispatcher, token: Arc<str>, connection_number: u64) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            dispatcher,
            token,
            client_id: None,
            connection_number,
        }
    }

    /// Runs the connection to completion and returns the client id, if the
    /// handshake succeeded.
    pub async fn run(mut self) -> Option<String> {
        debug!(connection = self.connection_number, "New client connected");

        // Subscribe first so nothing published after `connected` is missed
        let pushes = self.dispatcher.shared().hub.subscribe();

        if let Err(e) = self.handle_handshake().await {
            warn!(connection = self.connection_number, error = %e, "Handshake failed");
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        let forwarder = self.spawn_push_forwarder(pushes);
        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }
        forwarder.abort();

        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let line = match timeout(HANDSHAKE_TIMEOUT, self.read_line()).await {
            Ok(line) => line?,
            Err(_) => return Err(ConnectionError::HandshakeTimeout),
        };

        let Handshake::Connect {
            token,
            protocol_version,
            client_id,
        } = match serde_json::from_str::<Handshake>(&line) {
            Ok(handshake) => handshake,
            Err(e) => {
                self.send_message(&ServerMessage::rejected("Expected connect handshake"))
                    .await?;
                return Err(ConnectionError::UnexpectedMessage(e.to_string()));
            }
        };

        if let Err(e) = ProtocolVersion::CURRENT.check(&protocol_version) {
            warn!(
                client_version = %protocol_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(&ServerMessage::rejected(e.to_string())).await?;
            return Err(ConnectionError::VersionMismatch(e));
        }

        if token.as_str() != &*self.token {
            self.send_message(&ServerMessage::rejected("Invalid token")).await?;
            return Err(ConnectionError::Unauthorized);
        }

        let assigned = client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
        self.client_id = Some(assigned.clone());
        self.send_message(&ServerMessage::connected(assigned)).await
    }

    fn spawn_push_forwarder(&self, mut pushes: broadcast::Receiver<ServerMessage>) -> JoinHandle<()> {
        let writer = Arc::clone(&self.writer);
        let client_id = self.client_id.clone();
        tokio::spawn(async move {
            loop {
                match pushes.recv().await {
                    Ok(push) => {
                        if let Err(e) = write_line(&writer, &push).await {
                            debug!(client_id = ?client_id, error = %e, "Push delivery failed");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client_id = ?client_id, skipped = n, "Client lagged, skipped pushes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(ConnectionError::Eof) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Err(e @ ConnectionError::MessageTooLarge { .. }) => {
                    let _ = self.send_message(&ServerMessage::error(e.to_string())).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<ClientRequest>(&line) {
                Ok(request) => {
                    debug!(client_id = ?self.client_id, request = request.kind(), "Received request");
                    self.dispatcher.handle(request).await
                }
                Err(e) => ServerMessage::error(format!("Invalid message: {e}")),
            };
            self.send_message(&response).await?;
        }
    }

    async fn read_line(&mut self) -> Result<String, ConnectionError> {
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(line)
    }

    async fn send_message(&self, msg: &ServerMessage) -> Result<(), ConnectionError> {
        write_line(&self.writer, msg).await
    }
}

/// Writes one message as a JSON line under the write timeout.
async fn write_line<W>(writer: &SharedWriter<W>, msg: &ServerMessage) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|e| ConnectionError::Parse(e.to_string()))?;
    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: {0}")]
    VersionMismatch(VersionError),

    #[error("Invalid auth token")]
    Unauthorized,

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
