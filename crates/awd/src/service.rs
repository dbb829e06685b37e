//! Request dispatcher shared by every transport.
//!
//! Each [`ClientRequest`] maps to exactly one [`ServerMessage`] response.
//! Failures become `error` responses; nothing here closes a connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aw_core::{extract_messages, read_all_entries, Conversation, SessionId};
use aw_protocol::{ClientRequest, DeepLink, ServerMessage};
use tracing::{debug, info, warn};

use crate::actions::{stop_process, Opener};
use crate::bridge::BridgeClient;
use crate::config::Config;
use crate::logindex::{find_session_log, is_valid_session_id};
use crate::managed::touch_session_log;
use crate::poller::SharedState;

/// Time given to a stopped process to exit before the bridge resumes its
/// session.
pub const TAKEOVER_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    shared: SharedState,
    bridge: Arc<BridgeClient>,
    opener: Opener,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, shared: SharedState, bridge: Arc<BridgeClient>) -> Self {
        let opener = Opener::new(config.open_command.clone());
        Self {
            config,
            shared,
            bridge,
            opener,
        }
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn bridge(&self) -> &Arc<BridgeClient> {
        &self.bridge
    }

    /// Handles one request.
    pub async fn handle(&self, request: ClientRequest) -> ServerMessage {
        debug!(request = request.kind(), "Handling request");
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(message) => {
                debug!(error = %message, "Request failed");
                ServerMessage::Error { message }
            }
        }
    }

    async fn dispatch(&self, request: ClientRequest) -> Result<ServerMessage, String> {
        match request {
            ClientRequest::GetSessions => {
                let data = self.shared.snapshot.borrow().clone();
                Ok(ServerMessage::Sessions { data })
            }

            ClientRequest::GetConversation { session_id } => {
                let data = self.conversation(session_id).await?;
                Ok(ServerMessage::Conversation { data })
            }

            ClientRequest::StopSession { pid } => {
                if !self.shared.is_session_pid(pid) {
                    return Err(format!("No session with pid {pid}"));
                }
                stop_process(pid).map_err(|e| e.to_string())?;
                Ok(ServerMessage::Ok)
            }

            ClientRequest::OpenSession { pid, project_path } => {
                self.opener.open(pid, &project_path).map_err(|e| e.to_string())?;
                Ok(ServerMessage::Ok)
            }

            ClientRequest::RenameSession { session_id, new_name } => {
                let mut titles = self.shared.titles.lock().await;
                titles.set(&session_id, &new_name);
                titles
                    .save()
                    .map_err(|e| format!("Failed to save titles: {e}"))?;
                info!(session_id = %session_id, "Session renamed");
                Ok(ServerMessage::Ok)
            }

            ClientRequest::TakeoverSession {
                pid,
                session_id,
                project_path,
            } => {
                self.take_over(pid, &session_id, &project_path).await?;
                Ok(ServerMessage::Ok)
            }

            ClientRequest::SendInput {
                session_id,
                input,
                project_path,
                pid,
            } => {
                let pid = pid.unwrap_or(0);
                if pid > 0 && !self.shared.managed.contains(&session_id).await {
                    self.take_over(pid, &session_id, &project_path).await?;
                }
                self.bridge
                    .send(session_id.as_str(), &input, Some(&project_path))
                    .await
                    .map_err(|e| e.to_string())?;
                self.touch(session_id);
                Ok(ServerMessage::Ok)
            }

            ClientRequest::IsSessionManaged { session_id } => Ok(ServerMessage::ManagedStatus {
                managed: self.shared.managed.contains(&session_id).await,
            }),

            ClientRequest::OpenNotification { notification_id } => {
                let target = self
                    .shared
                    .notifications
                    .lock()
                    .await
                    .get(&notification_id)
                    .map(|n| (n.pid.unwrap_or(0), n.project_path.clone()))
                    .ok_or_else(|| format!("Unknown notification: {notification_id}"))?;
                self.opener.open(target.0, &target.1).map_err(|e| e.to_string())?;
                Ok(ServerMessage::Ok)
            }

            ClientRequest::OpenUrl { url } => {
                let link = DeepLink::parse(&url, &self.config.deep_link_scheme).map_err(|e| e.to_string())?;
                self.opener
                    .open(link.pid, &link.project_path)
                    .map_err(|e| e.to_string())?;
                Ok(ServerMessage::Ok)
            }
        }
    }

    /// Stops the session's process (if any), marks it managed, and registers
    /// it with the bridge.
    async fn take_over(&self, pid: u32, session_id: &SessionId, project_path: &str) -> Result<(), String> {
        if pid > 0 {
            if !self.shared.is_session_pid(pid) {
                return Err(format!("No session with pid {pid}"));
            }
            if let Err(e) = stop_process(pid) {
                warn!(pid, error = %e, "Failed to stop process during takeover");
            }
            tokio::time::sleep(TAKEOVER_GRACE).await;
        }
        self.shared
            .managed
            .insert(session_id.clone(), project_path)
            .await;
        self.bridge
            .resume(session_id.as_str(), project_path)
            .await
            .map_err(|e| e.to_string())?;
        info!(session_id = %session_id, pid, "Session taken over");
        self.touch(session_id.clone());
        Ok(())
    }

    /// Touches the session's log in the background.
    fn touch(&self, session_id: SessionId) {
        let projects_dir = self.config.projects_dir.clone();
        tokio::task::spawn_blocking(move || touch_session_log(&projects_dir, session_id.as_str()));
    }

    async fn conversation(&self, session_id: SessionId) -> Result<Conversation, String> {
        if !is_valid_session_id(session_id.as_str()) {
            return Err(format!("Invalid session id: {session_id}"));
        }
        let projects_dir: PathBuf = self.config.projects_dir.clone();
        let id = session_id.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            let path = find_session_log(&projects_dir, id.as_str())?;
            Some(read_all_entries(&path))
        })
        .await
        .map_err(|e| format!("Conversation task failed: {e}"))?;

        let entries = match loaded {
            Some(Ok(entries)) => entries,
            Some(Err(e)) => return Err(e.to_string()),
            None => return Err(format!("Session not found: {session_id}")),
        };
        let project_path = entries
            .iter()
            .find_map(|e| e.meta().and_then(|m| m.cwd.clone()));
        Ok(Conversation {
            messages: extract_messages(&entries),
            session_id,
            project_path,
        })
    }
}
