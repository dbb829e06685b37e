//! Bridge control protocol.
//!
//! One JSON object per line in both directions between the daemon and the
//! `aw-bridge` process.
//!
//! ```text
//! daemon -> bridge   {"cmd":"send","id":"7f..","sessionId":"S1","message":"hi","cwd":"/p"}
//! bridge -> daemon   {"type":"ack","id":"7f..","success":true}
//!                    {"type":"streamEvent","sessionId":"S1","data":{...}}
//!                    {"type":"streamEnd","sessionId":"S1","success":true}
//! ```
//!
//! Commands are parsed in two steps: first into the permissive [`RawCommand`]
//! (so that any line carrying an `id` can still be acked), then into a typed
//! [`BridgeRequest`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Commands (daemon -> bridge)
// ============================================================================

/// A control line as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCommand {
    pub cmd: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// A typed control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Register a session's working directory without spawning
    Resume { session_id: String, cwd: String },
    /// Run one turn
    Send {
        session_id: String,
        message: String,
        cwd: Option<String>,
    },
    /// Forget a session; in-flight turns keep running
    Close { session_id: String },
    /// Anything else, acked as a failure
    Unknown(String),
}

/// A command plus the id its ack must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub id: String,
    pub command: BridgeCommand,
}

impl BridgeRequest {
    pub fn resume(id: impl Into<String>, session_id: impl Into<String>, cwd: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: BridgeCommand::Resume {
                session_id: session_id.into(),
                cwd: cwd.into(),
            },
        }
    }

    pub fn send(
        id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
        cwd: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            command: BridgeCommand::Send {
                session_id: session_id.into(),
                message: message.into(),
                cwd,
            },
        }
    }

    pub fn close(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: BridgeCommand::Close {
                session_id: session_id.into(),
            },
        }
    }
}

impl TryFrom<RawCommand> for BridgeRequest {
    /// Human-readable reason, sent back in the ack
    type Error = String;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        fn require(field: Option<String>, name: &str) -> Result<String, String> {
            field.ok_or_else(|| format!("Missing field: {name}"))
        }

        let command = match raw.cmd.as_str() {
            "resume" => BridgeCommand::Resume {
                session_id: require(raw.session_id, "sessionId")?,
                cwd: require(raw.cwd, "cwd")?,
            },
            "send" => BridgeCommand::Send {
                session_id: require(raw.session_id, "sessionId")?,
                message: require(raw.message, "message")?,
                cwd: raw.cwd,
            },
            "close" => BridgeCommand::Close {
                session_id: require(raw.session_id, "sessionId")?,
            },
            other => BridgeCommand::Unknown(other.to_string()),
        };
        Ok(Self { id: raw.id, command })
    }
}

impl From<BridgeRequest> for RawCommand {
    fn from(request: BridgeRequest) -> Self {
        let id = request.id;
        match request.command {
            BridgeCommand::Resume { session_id, cwd } => Self {
                cmd: "resume".to_string(),
                id,
                session_id: Some(session_id),
                cwd: Some(cwd),
                ..Self::default()
            },
            BridgeCommand::Send {
                session_id,
                message,
                cwd,
            } => Self {
                cmd: "send".to_string(),
                id,
                session_id: Some(session_id),
                message: Some(message),
                cwd,
            },
            BridgeCommand::Close { session_id } => Self {
                cmd: "close".to_string(),
                id,
                session_id: Some(session_id),
                ..Self::default()
            },
            BridgeCommand::Unknown(cmd) => Self {
                cmd,
                id,
                ..Self::default()
            },
        }
    }
}

// ============================================================================
// Messages (bridge -> daemon)
// ============================================================================

/// A line written by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeMessage {
    /// Accept or reject one command
    Ack {
        id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One line of structured agent output
    StreamEvent { session_id: String, data: Value },

    /// Terminates a turn; exactly one per accepted send
    StreamEnd {
        session_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BridgeMessage {
    pub fn ack_ok(id: impl Into<String>) -> Self {
        Self::Ack {
            id: id.into(),
            success: true,
            error: None,
        }
    }

    pub fn ack_err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Ack {
            id: id.into(),
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn stream_event(session_id: impl Into<String>, data: Value) -> Self {
        Self::StreamEvent {
            session_id: session_id.into(),
            data,
        }
    }

    pub fn stream_end(session_id: impl Into<String>, result: Result<(), String>) -> Self {
        let (success, error) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e)),
        };
        Self::StreamEnd {
            session_id: session_id.into(),
            success,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(line: &str) -> Result<BridgeRequest, String> {
        let raw: RawCommand = serde_json::from_str(line).unwrap();
        BridgeRequest::try_from(raw)
    }

    #[test]
    fn test_parse_send_without_cwd() {
        let req = parse(r#"{"cmd":"send","id":"1","sessionId":"S2","message":"hello"}"#).unwrap();
        assert_eq!(req, BridgeRequest::send("1", "S2", "hello", None));
    }

    #[test]
    fn test_parse_resume_requires_cwd() {
        let err = parse(r#"{"cmd":"resume","id":"1","sessionId":"S2"}"#).unwrap_err();
        assert_eq!(err, "Missing field: cwd");
    }

    #[test]
    fn test_unknown_command_keeps_name() {
        let req = parse(r#"{"cmd":"explode","id":"9"}"#).unwrap();
        assert_eq!(req.id, "9");
        assert_eq!(req.command, BridgeCommand::Unknown("explode".to_string()));
    }

    #[test]
    fn test_request_wire_shape() {
        let raw = RawCommand::from(BridgeRequest::resume("a", "S1", "/tmp/proj"));
        assert_eq!(
            serde_json::to_value(&raw).unwrap(),
            json!({"cmd": "resume", "id": "a", "sessionId": "S1", "cwd": "/tmp/proj"})
        );
    }

    #[test]
    fn test_message_wire_shapes() {
        assert_eq!(
            serde_json::to_value(BridgeMessage::ack_err("1", "Unknown command: x")).unwrap(),
            json!({"type": "ack", "id": "1", "success": false, "error": "Unknown command: x"})
        );
        assert_eq!(
            serde_json::to_value(BridgeMessage::stream_event("S1", json!({"type": "assistant"}))).unwrap(),
            json!({"type": "streamEvent", "sessionId": "S1", "data": {"type": "assistant"}})
        );
        assert_eq!(
            serde_json::to_value(BridgeMessage::stream_end("S1", Ok(()))).unwrap(),
            json!({"type": "streamEnd", "sessionId": "S1", "success": true})
        );
    }
}
