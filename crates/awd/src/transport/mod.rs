//! Transport adapters.
//!
//! One interface, two channels carrying the same vocabulary:
//! - [`InProcessTransport`] calls the dispatcher directly and subscribes to
//!   the event hub, for embedding the daemon in another process
//! - [`SocketServer`] / [`SocketClient`] carry the same messages as
//!   newline-delimited JSON over TCP, behind a token handshake
//!
//! ```text
//!                ┌──────────────────┐
//!  request ────▶ │    Dispatcher    │ ────▶ response
//!                └──────────────────┘
//!                ┌──────────────────┐
//!  subscribe ──▶ │     EventHub     │ ────▶ sessionsUpdated / streamEvent /
//!                └──────────────────┘       streamEnd / notificationFired
//! ```

mod client;
mod connection;
mod server;

pub use client::SocketClient;
pub use connection::{ConnectionError, ConnectionHandler};
pub use server::{ServerError, SocketServer};

use async_trait::async_trait;
use aw_protocol::{ClientRequest, ServerMessage};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::events::EventHub;
use crate::service::Dispatcher;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Unexpected handshake reply: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Request timed out")]
    Timeout,
}

/// Request/response plus publish/subscribe, independent of the channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and waits for its response.
    async fn request(&self, request: ClientRequest) -> Result<ServerMessage, TransportError>;

    /// Subscribes to pushes published after this call.
    fn subscribe(&self) -> broadcast::Receiver<ServerMessage>;
}

/// Same-process channel.
#[derive(Clone)]
pub struct InProcessTransport {
    dispatcher: Dispatcher,
    hub: EventHub,
}

impl InProcessTransport {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let hub = dispatcher.shared().hub.clone();
        Self { dispatcher, hub }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn request(&self, request: ClientRequest) -> Result<ServerMessage, TransportError> {
        Ok(self.dispatcher.handle(request).await)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.hub.subscribe()
    }
}
