//! Socket client.
//!
//! Responses arrive in request order, so waiters sit in a FIFO queue. Push
//! messages are split off by type and rebroadcast locally.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aw_protocol::{ClientRequest, Handshake, ServerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Transport, TransportError};

/// How long a request may wait for its response
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Push buffer per client
const PUSH_BUFFER: usize = 256;

type Waiters = Arc<Mutex<Option<VecDeque<oneshot::Sender<ServerMessage>>>>>;

pub struct SocketClient {
    client_id: String,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    waiters: Waiters,
    pushes: broadcast::Sender<ServerMessage>,
    closed: CancellationToken,
}

impl SocketClient {
    /// Connects and completes the handshake.
    pub async fn connect(addr: &str, token: &str, client_id: Option<String>) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut writer = BufWriter::new(writer);

        write_json(&mut writer, &Handshake::connect(token, client_id)).await?;
        let reply = match timeout(REQUEST_TIMEOUT, lines.next_line()).await {
            Ok(Ok(Some(line))) => serde_json::from_str::<ServerMessage>(&line)?,
            Ok(Ok(None)) => return Err(TransportError::Closed),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout),
        };
        let client_id = match reply {
            ServerMessage::Connected { client_id, .. } => client_id,
            ServerMessage::Rejected { reason, .. } => return Err(TransportError::Rejected(reason)),
            other => return Err(TransportError::Handshake(format!("{other:?}"))),
        };
        debug!(client_id = %client_id, addr, "Connected to daemon");

        let waiters: Waiters = Arc::new(Mutex::new(Some(VecDeque::new())));
        let (pushes, _) = broadcast::channel(PUSH_BUFFER);
        let closed = CancellationToken::new();
        tokio::spawn(read_messages(
            lines,
            Arc::clone(&waiters),
            pushes.clone(),
            closed.clone(),
        ));

        Ok(Self {
            client_id,
            writer: Mutex::new(writer),
            waiters,
            pushes,
            closed,
        })
    }

    /// Id the server assigned (or accepted) for this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Completes once the daemon has closed the connection.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

#[async_trait]
impl Transport for SocketClient {
    async fn request(&self, request: ClientRequest) -> Result<ServerMessage, TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            // Queue and write under one lock so queue order is wire order
            let mut writer = self.writer.lock().await;
            match self.waiters.lock().await.as_mut() {
                Some(queue) => queue.push_back(tx),
                None => return Err(TransportError::Closed),
            }
            write_json(&mut *writer, &request).await?;
        }

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.pushes.subscribe()
    }
}

async fn write_json<T: serde::Serialize>(
    writer: &mut BufWriter<OwnedWriteHalf>,
    value: &T,
) -> Result<(), TransportError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_messages(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    waiters: Waiters,
    pushes: broadcast::Sender<ServerMessage>,
    closed: CancellationToken,
) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from daemon");
                break;
            }
        };
        let message: ServerMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed daemon message");
                continue;
            }
        };

        if message.is_push() {
            // No subscribers is fine
            let _ = pushes.send(message);
            continue;
        }
        let waiter = waiters.lock().await.as_mut().and_then(VecDeque::pop_front);
        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("Response with no pending request"),
        }
    }

    // Dropping the queue fails every outstanding request with `Closed`
    waiters.lock().await.take();
    closed.cancel();
    debug!("Daemon connection closed");
}
