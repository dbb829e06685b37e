//! Wires the poller, bridge client, dispatcher and socket server together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bridge::BridgeClient;
use crate::config::Config;
use crate::discovery::ProcessSource;
use crate::events::EventHub;
use crate::poller::Poller;
use crate::service::Dispatcher;
use crate::transport::{InProcessTransport, ServerError, SocketServer};

pub struct Daemon {
    config: Arc<Config>,
    poller: Poller,
    dispatcher: Dispatcher,
}

impl Daemon {
    pub fn build(config: Config, source: Arc<dyn ProcessSource>) -> Self {
        let config = Arc::new(config);
        let hub = EventHub::new();
        let (poller, shared) = Poller::new(Arc::clone(&config), source, hub.clone());
        let bridge = Arc::new(BridgeClient::new(config.bridge_program(), hub));
        let dispatcher = Dispatcher::new(Arc::clone(&config), shared, bridge);
        Self {
            config,
            poller,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Same-process channel onto this daemon.
    pub fn in_process(&self) -> InProcessTransport {
        InProcessTransport::new(self.dispatcher.clone())
    }

    /// Runs the poller and the socket server until cancelled, then stops the
    /// bridge.
    pub async fn run(self, token: &str, cancel_token: CancellationToken) -> Result<(), ServerError> {
        let Self {
            config,
            poller,
            dispatcher,
        } = self;

        let server = SocketServer::bind(&config.listen_addr, token, dispatcher.clone(), cancel_token.clone()).await?;
        info!(addr = %server.local_addr(), "Socket transport ready");

        let poller_handle = tokio::spawn(poller.run(cancel_token.clone()));
        let result = server.run().await;

        cancel_token.cancel();
        if let Err(e) = poller_handle.await {
            error!(error = %e, "Poller task failed");
        }
        dispatcher.bridge().shutdown().await;
        result
    }

    /// Runs the poller alone, for embedders that only use [`Self::in_process`].
    pub async fn run_in_process(self, cancel_token: CancellationToken) {
        let Self {
            poller, dispatcher, ..
        } = self;
        poller.run(cancel_token).await;
        dispatcher.bridge().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{AgentProcess, DiscoveryError};
    use crate::transport::Transport;
    use aw_protocol::{ClientRequest, ServerMessage};
    use std::time::Duration;

    struct NoProcesses;

    impl ProcessSource for NoProcesses {
        fn snapshot(&self) -> Result<Vec<AgentProcess>, DiscoveryError> {
            Ok(Vec::new())
        }
    }

    fn config(root: &std::path::Path) -> Config {
        Config {
            projects_dir: root.join("projects"),
            titles_path: root.join("titles.json"),
            settings_path: root.join("settings.json"),
            listen_addr: "127.0.0.1:0".to_string(),
            poll_interval_ms: 20,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_in_process_channel_sees_poller_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::build(config(dir.path()), Arc::new(NoProcesses));
        let transport = daemon.in_process();
        let mut pushes = transport.subscribe();

        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(daemon.run_in_process(cancel_token.clone()));

        let push = tokio::time::timeout(Duration::from_secs(2), pushes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(push, ServerMessage::SessionsUpdated { data: vec![] });
        assert_eq!(
            transport.request(ClientRequest::GetSessions).await.unwrap(),
            ServerMessage::Sessions { data: vec![] }
        );

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::build(config(dir.path()), Arc::new(NoProcesses));
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(daemon.run("token", cancel_token.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
