//! TCP socket server.
//!
//! ```text
//! ┌─────────────────┐
//! │  SocketServer   │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   Dispatcher    │
//! │   (per client)  │     └─────────────────┘
//! │                 │◀──── EventHub pushes
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Accept failures are logged and the loop keeps accepting. A failing
//! connection never affects the others.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use aw_protocol::ServerMessage;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionError, ConnectionHandler};
use crate::service::Dispatcher;

/// Maximum number of concurrent clients
const MAX_CLIENTS: usize = 32;

pub struct SocketServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    token: Arc<str>,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl SocketServer {
    /// Binds the listener. Use port 0 to let the OS pick one.
    pub async fn bind(
        addr: &str,
        token: impl Into<Arc<str>>,
        dispatcher: Dispatcher,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let bind_error = |e: std::io::Error| ServerError::Bind {
            addr: addr.to_string(),
            error: e.to_string(),
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        Ok(Self {
            listener,
            local_addr,
            dispatcher,
            token: token.into(),
            cancel_token,
            connection_counter: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Socket server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer, connection = conn_num, "Accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!("Socket server stopped");
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, connection_number: u64) {
        let active = Arc::clone(&self.active);
        if active.fetch_add(1, Ordering::SeqCst) >= MAX_CLIENTS {
            active.fetch_sub(1, Ordering::SeqCst);
            warn!(max = MAX_CLIENTS, "Too many clients, refusing connection");
            tokio::spawn(refuse(stream));
            return;
        }

        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.dispatcher.clone(),
            Arc::clone(&self.token),
            connection_number,
        );
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                client_id = handler.run() => {
                    debug!(client_id = ?client_id, "Connection handler finished");
                }
                _ = cancel_token.cancelled() => {
                    debug!(connection = connection_number, "Connection dropped on shutdown");
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Tells an over-limit client why it is being dropped.
async fn refuse(mut stream: TcpStream) {
    let reply = ServerMessage::rejected(ServerError::TooManyClients { max: MAX_CLIENTS }.to_string());
    if let Ok(mut line) = serde_json::to_string(&reply) {
        line.push('\n');
        let _ = stream.write_all(line.as_bytes()).await;
    }
}

/// Errors that can occur in the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Too many clients (max: {max})")]
    TooManyClients { max: usize },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
