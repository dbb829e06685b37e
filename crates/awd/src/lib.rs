//! agent-watch daemon - session poller, notifications and transports
//!
//! - `discovery` - finds running agent processes
//! - `logindex` / `matcher` - pairs log files with processes and reads them incrementally
//! - `tracker` / `notify` - status transitions and the notification ring
//! - `poller` - the poll loop tying the above together
//! - `bridge` - client for the `aw-bridge` child process
//! - `service` - request dispatcher shared by every transport
//! - `transport` - in-process and TCP socket channels
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          awd                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │     Poller      │────▶│          EventHub           │    │
//! │  │ (every tick)    │     │  (broadcast::Sender)        │    │
//! │  └────────┬────────┘     └──────────────▲──────────────┘    │
//! │           │ snapshot                    │ stream pushes     │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐    │
//! │  │   Dispatcher    │────▶│        BridgeClient         │    │
//! │  └────────▲────────┘     │   (aw-bridge child stdio)   │    │
//! │           │              └─────────────────────────────┘    │
//! │  ┌────────┴────────┐                                        │
//! │  │ InProcess / TCP │                                        │
//! │  └─────────────────┘                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate does not call `.unwrap()`, `.expect()` or
//! `panic!()`. Failures surface as `Result`s, `error` responses or log lines.

pub mod actions;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod discovery;
pub mod events;
pub mod logindex;
pub mod managed;
pub mod matcher;
pub mod notify;
pub mod poller;
pub mod service;
pub mod titles;
pub mod tracker;
pub mod transport;

pub use bridge::{BridgeClient, BridgeError};
pub use config::{Config, ConfigError};
pub use daemon::Daemon;
pub use discovery::{AgentProcess, DiscoveryError, ProcessSource, SystemProcessSource};
pub use events::EventHub;
pub use poller::{Poller, SharedState};
pub use service::Dispatcher;
pub use transport::{InProcessTransport, SocketClient, SocketServer, Transport, TransportError};
