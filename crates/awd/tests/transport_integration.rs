//! Integration tests for the two transports.
//!
//! The same requests go through the in-process channel and the TCP socket;
//! both must answer identically. Handshake, ordering and push delivery are
//! checked over real loopback connections.
//!
//! Tests CAN use .unwrap() - it's only production code that must be panic-free.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aw_core::SessionId;
use aw_protocol::{ClientRequest, ServerMessage};
use awd::config::Config;
use awd::discovery::{AgentProcess, DiscoveryError, ProcessSource};
use awd::events::EventHub;
use awd::poller::Poller;
use awd::transport::{InProcessTransport, SocketClient, SocketServer, Transport, TransportError};
use awd::{BridgeClient, Dispatcher};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";

// ============================================================================
// Test Helpers
// ============================================================================

struct OneProcess;

impl ProcessSource for OneProcess {
    fn snapshot(&self) -> Result<Vec<AgentProcess>, DiscoveryError> {
        Ok(vec![AgentProcess {
            pid: 321,
            cwd: "/code/app".into(),
            start_time: 1,
        }])
    }
}

struct TestDaemon {
    addr: SocketAddr,
    hub: EventHub,
    in_process: InProcessTransport,
    cancel_token: CancellationToken,
    _dir: TempDir,
}

impl TestDaemon {
    async fn spawn() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("projects/-code-app");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("S1.jsonl"),
            format!(
                "{}\n",
                json!({"type": "user", "cwd": "/code/app", "message": {"role": "user", "content": "hello"}})
            ),
        )
        .unwrap();

        let config = Arc::new(Config {
            projects_dir: dir.path().join("projects"),
            settings_path: dir.path().join("settings.json"),
            titles_path: dir.path().join("titles.json"),
            bridge_path: Some(dir.path().join("no-bridge")),
            open_command: Some("true".to_string()),
            ..Config::default()
        });
        let hub = EventHub::new();
        let (mut poller, shared) = Poller::new(Arc::clone(&config), Arc::new(OneProcess), hub.clone());
        poller.tick().await.unwrap();

        let bridge = Arc::new(BridgeClient::new(config.bridge_program(), hub.clone()));
        let dispatcher = Dispatcher::new(config, shared, bridge);

        let cancel_token = CancellationToken::new();
        let server = SocketServer::bind("127.0.0.1:0", TOKEN, dispatcher.clone(), cancel_token.clone())
            .await
            .unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());

        Self {
            addr,
            hub,
            in_process: InProcessTransport::new(dispatcher),
            cancel_token,
            _dir: dir,
        }
    }

    async fn client(&self) -> SocketClient {
        SocketClient::connect(&self.addr.to_string(), TOKEN, None).await.unwrap()
    }

    async fn raw(&self) -> RawClient {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        RawClient {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Line-level client for handshake edge cases.
struct RawClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl RawClient {
    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

fn requests() -> Vec<ClientRequest> {
    vec![
        ClientRequest::GetSessions,
        ClientRequest::GetConversation {
            session_id: SessionId::new("S1"),
        },
        ClientRequest::GetConversation {
            session_id: SessionId::new("missing"),
        },
        ClientRequest::IsSessionManaged {
            session_id: SessionId::new("S1"),
        },
        ClientRequest::OpenNotification {
            notification_id: "nope".to_string(),
        },
        ClientRequest::OpenUrl {
            url: "elsewhere://open-session?pid=1&path=%2F".to_string(),
        },
        ClientRequest::StopSession { pid: 0 },
    ]
}

// ============================================================================
// Parity
// ============================================================================

#[tokio::test]
async fn socket_and_in_process_answer_identically() {
    let daemon = TestDaemon::spawn().await;
    let client = daemon.client().await;

    for request in requests() {
        let direct = daemon.in_process.request(request.clone()).await.unwrap();
        let remote = client.request(request.clone()).await.unwrap();
        assert_eq!(
            serde_json::to_value(&direct).unwrap(),
            serde_json::to_value(&remote).unwrap(),
            "{}",
            request.kind()
        );
    }
}

#[tokio::test]
async fn sessions_response_carries_the_snapshot() {
    let daemon = TestDaemon::spawn().await;
    let client = daemon.client().await;

    let ServerMessage::Sessions { data } = client.request(ClientRequest::GetSessions).await.unwrap() else {
        panic!("expected sessions");
    };
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].pid, Some(321));
    assert_eq!(data[0].id.as_str(), "S1");
}

#[tokio::test]
async fn pushes_reach_both_channels() {
    let daemon = TestDaemon::spawn().await;
    let client = daemon.client().await;
    let mut remote = client.subscribe();
    let mut direct = daemon.in_process.subscribe();

    let push = ServerMessage::StreamEvent {
        session_id: "S1".to_string(),
        data: json!({"type": "assistant", "n": 1}),
    };
    daemon.hub.publish(push.clone());

    let got_remote = timeout(Duration::from_secs(2), remote.recv()).await.unwrap().unwrap();
    let got_direct = timeout(Duration::from_secs(2), direct.recv()).await.unwrap().unwrap();
    assert_eq!(got_remote, push);
    assert_eq!(got_direct, push);
}

#[tokio::test]
async fn concurrent_requests_get_their_own_responses() {
    let daemon = TestDaemon::spawn().await;
    let client = daemon.client().await;

    let (sessions, managed, missing) = tokio::join!(
        client.request(ClientRequest::GetSessions),
        client.request(ClientRequest::IsSessionManaged {
            session_id: SessionId::new("S1"),
        }),
        client.request(ClientRequest::GetConversation {
            session_id: SessionId::new("missing"),
        }),
    );
    assert!(matches!(sessions.unwrap(), ServerMessage::Sessions { .. }));
    assert_eq!(managed.unwrap(), ServerMessage::ManagedStatus { managed: false });
    assert_eq!(missing.unwrap(), ServerMessage::error("Session not found: missing"));
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn wrong_token_is_rejected() {
    let daemon = TestDaemon::spawn().await;
    let err = SocketClient::connect(&daemon.addr.to_string(), "wrong", None)
        .await
        .err()
        .unwrap();
    match err {
        TransportError::Rejected(reason) => assert_eq!(reason, "Invalid token"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn major_version_mismatch_is_rejected_minor_is_not() {
    let daemon = TestDaemon::spawn().await;

    let mut raw = daemon.raw().await;
    raw.send(&json!({"type": "connect", "token": TOKEN, "protocolVersion": {"major": 2, "minor": 0}}).to_string())
        .await;
    let reply = raw.recv().await;
    assert_eq!(reply["type"], "rejected");
    assert!(reply["reason"].as_str().unwrap().contains("Incompatible protocol version"));

    let mut raw = daemon.raw().await;
    raw.send(
        &json!({"type": "connect", "token": TOKEN, "protocolVersion": {"major": 1, "minor": 0}, "clientId": "old-ui"})
            .to_string(),
    )
    .await;
    let reply = raw.recv().await;
    assert_eq!(reply["type"], "connected");
    assert_eq!(reply["clientId"], "old-ui");
}

#[tokio::test]
async fn request_before_handshake_is_rejected() {
    let daemon = TestDaemon::spawn().await;
    let mut raw = daemon.raw().await;
    raw.send(r#"{"type":"getSessions"}"#).await;
    assert_eq!(raw.recv().await["type"], "rejected");
}

#[tokio::test]
async fn malformed_request_gets_error_and_connection_survives() {
    let daemon = TestDaemon::spawn().await;
    let mut raw = daemon.raw().await;
    raw.send(&json!({"type": "connect", "token": TOKEN, "protocolVersion": {"major": 1, "minor": 1}}).to_string())
        .await;
    let reply = raw.recv().await;
    assert_eq!(reply["type"], "connected");
    assert!(reply["clientId"].as_str().unwrap().starts_with("client-"));

    raw.send("{not json").await;
    let reply = raw.recv().await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"].as_str().unwrap().starts_with("Invalid message:"));

    raw.send(r#"{"type":"isSessionManaged","sessionId":"S1"}"#).await;
    let reply = raw.recv().await;
    assert_eq!(reply, json!({"type": "managedStatus", "managed": false}));
}
