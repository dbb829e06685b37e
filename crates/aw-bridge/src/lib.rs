//! agent-watch bridge - multiplexes one control channel into many agent turns
//!
//! The daemon starts `aw-bridge` once and talks to it over stdin/stdout with
//! the line protocol in [`aw_protocol::bridge`]:
//! - `control` - command dispatch, per-turn supervision
//! - `registry` - session id to working directory
//! - `spawner` - one agent child process per turn
//! - `output` - single ordered writer for stdout
//!
//! Logs go to stderr only; stdout carries protocol lines and nothing else.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()` in production code. Per-turn
//! failures end that turn with a failed `streamEnd`; the control loop only
//! stops on input EOF or a broken stdout.

pub mod cli;
pub mod control;
pub mod output;
pub mod registry;
pub mod spawner;

pub use control::{run_bridge, Bridge, ControlError};
pub use output::{spawn_writer, OutputSink};
pub use registry::{BridgeSessionInfo, RegistryError, SessionRegistry};
pub use spawner::{resolve_cwd, resolve_executable, SpawnError, TurnSpawner};
