//! agent-watch protocol - wire types shared by the daemon, its clients and the bridge
//!
//! - `bridge` - line-delimited JSON spoken between the daemon and `aw-bridge`
//! - `message` - request/response and push vocabulary carried by both transports
//! - `version` - handshake versioning for the socket transport
//! - `deeplink` - `scheme://open-session?...` URLs embedded in notifications

pub mod bridge;
pub mod deeplink;
pub mod message;
pub mod version;

pub use bridge::{BridgeCommand, BridgeMessage, BridgeRequest, RawCommand};
pub use deeplink::{DeepLink, DeepLinkError};
pub use message::{ClientRequest, Handshake, ServerMessage};
pub use version::{ProtocolVersion, VersionError};
