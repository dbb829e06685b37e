//! Transport vocabulary.
//!
//! The same JSON shapes travel over the in-process channel and the socket:
//! a client sends [`ClientRequest`]s and receives exactly one
//! [`ServerMessage`] response per request, in request order, interleaved with
//! push messages (`sessionsUpdated`, `streamEvent`, `streamEnd`,
//! `notificationFired`).
//!
//! The socket additionally opens with a [`Handshake`] frame answered by
//! `connected` or `rejected`.

use crate::bridge::BridgeMessage;
use crate::version::ProtocolVersion;
use aw_core::{Conversation, NotificationMetadata, Session, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests a client can make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    /// Current snapshot
    GetSessions,

    /// Full message history of one session
    GetConversation { session_id: SessionId },

    /// Terminate the agent process
    StopSession { pid: u32 },

    /// Focus the terminal running the session
    OpenSession { pid: u32, project_path: String },

    /// Set a custom title
    RenameSession { session_id: SessionId, new_name: String },

    /// Stop the original process and continue the session in the bridge
    TakeoverSession {
        pid: u32,
        session_id: SessionId,
        project_path: String,
    },

    /// Run one turn; takes the session over first if it is still attached
    /// to a live unmanaged process
    SendInput {
        session_id: SessionId,
        input: String,
        project_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
    },

    IsSessionManaged { session_id: SessionId },

    /// Act on a fired notification
    OpenNotification { notification_id: String },

    /// Act on a deep link
    OpenUrl { url: String },
}

impl ClientRequest {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetSessions => "getSessions",
            Self::GetConversation { .. } => "getConversation",
            Self::StopSession { .. } => "stopSession",
            Self::OpenSession { .. } => "openSession",
            Self::RenameSession { .. } => "renameSession",
            Self::TakeoverSession { .. } => "takeoverSession",
            Self::SendInput { .. } => "sendInput",
            Self::IsSessionManaged { .. } => "isSessionManaged",
            Self::OpenNotification { .. } => "openNotification",
            Self::OpenUrl { .. } => "openUrl",
        }
    }
}

/// Messages sent to clients, both responses and pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    // ------------------------------------------------------------------
    // Handshake (socket only)
    // ------------------------------------------------------------------
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    // ------------------------------------------------------------------
    // Responses
    // ------------------------------------------------------------------
    Sessions { data: Vec<Session> },

    Conversation { data: Conversation },

    ManagedStatus { managed: bool },

    Ok,

    Error { message: String },

    // ------------------------------------------------------------------
    // Pushes
    // ------------------------------------------------------------------
    /// Full snapshot, every poll tick
    SessionsUpdated { data: Vec<Session> },

    StreamEvent { session_id: String, data: Value },

    StreamEnd {
        session_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    NotificationFired { data: NotificationMetadata },
}

impl ServerMessage {
    pub fn connected(client_id: impl Into<String>) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id: client_id.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// True for unsolicited messages that are not a response to a request.
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            Self::SessionsUpdated { .. }
                | Self::StreamEvent { .. }
                | Self::StreamEnd { .. }
                | Self::NotificationFired { .. }
        )
    }

    /// Converts bridge output into the push it is published as.
    ///
    /// Acks are consumed by the bridge client and never published.
    pub fn from_bridge(message: BridgeMessage) -> Option<Self> {
        match message {
            BridgeMessage::Ack { .. } => None,
            BridgeMessage::StreamEvent { session_id, data } => Some(Self::StreamEvent { session_id, data }),
            BridgeMessage::StreamEnd {
                session_id,
                success,
                error,
            } => Some(Self::StreamEnd {
                session_id,
                success,
                error,
            }),
        }
    }
}

/// First frame on a socket connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Handshake {
    Connect {
        token: String,
        protocol_version: ProtocolVersion,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}

impl Handshake {
    pub fn connect(token: impl Into<String>, client_id: Option<String>) -> Self {
        Self::Connect {
            token: token.into(),
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shapes() {
        let req: ClientRequest = serde_json::from_value(json!({
            "type": "sendInput", "sessionId": "S1", "input": "hi", "projectPath": "/p"
        }))
        .unwrap();
        assert_eq!(
            req,
            ClientRequest::SendInput {
                session_id: SessionId::new("S1"),
                input: "hi".to_string(),
                project_path: "/p".to_string(),
                pid: None,
            }
        );

        let req: ClientRequest = serde_json::from_value(json!({
            "type": "renameSession", "sessionId": "S1", "newName": "Deploy"
        }))
        .unwrap();
        assert_eq!(req.kind(), "renameSession");

        let json = serde_json::to_value(ClientRequest::GetSessions).unwrap();
        assert_eq!(json, json!({"type": "getSessions"}));
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(serde_json::to_value(ServerMessage::Ok).unwrap(), json!({"type": "ok"}));
        assert_eq!(
            serde_json::to_value(ServerMessage::ManagedStatus { managed: true }).unwrap(),
            json!({"type": "managedStatus", "managed": true})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::error("nope")).unwrap(),
            json!({"type": "error", "message": "nope"})
        );
    }

    #[test]
    fn test_bridge_output_becomes_push() {
        let end = ServerMessage::from_bridge(BridgeMessage::stream_end("S1", Err("boom".to_string()))).unwrap();
        assert!(end.is_push());
        assert_eq!(
            serde_json::to_value(&end).unwrap(),
            json!({"type": "streamEnd", "sessionId": "S1", "success": false, "error": "boom"})
        );
        assert!(ServerMessage::from_bridge(BridgeMessage::ack_ok("1")).is_none());
        assert!(!ServerMessage::Ok.is_push());
    }

    #[test]
    fn test_handshake_shape() {
        let json = serde_json::to_value(Handshake::connect("tok", None)).unwrap();
        assert_eq!(json["type"], "connect");
        assert_eq!(json["token"], "tok");
        assert_eq!(json["protocolVersion"]["major"], ProtocolVersion::CURRENT.major);
    }
}
