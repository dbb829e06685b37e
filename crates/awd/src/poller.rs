//! Poll loop: scan, match, read, classify, diff, publish.
//!
//! ```text
//! every tick:
//!   ProcessSource ─┐
//!                  ├─▶ match_sessions ─▶ LogIndex::refresh ─▶ classify
//!   list_logs ─────┘                                            │
//!                                                               ▼
//!           watch snapshot ◀── sessionsUpdated ◀── TransitionTracker ──▶ notificationFired
//! ```
//!
//! A single task runs the loop. Ticks never overlap: a slow tick delays the
//! next one instead of queueing a burst. The tracker and the log index are
//! owned by the loop.
//!
//! # Panic-Free Guarantees
//!
//! A failed process scan skips the tick and keeps the previous snapshot, so
//! no session loses its pid and no transition is invented. Per-log read
//! failures fall back to that log's last good status.

use std::sync::Arc;
use std::time::SystemTime;

use aw_core::{PermissionChecker, Session};
use aw_protocol::ServerMessage;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::{self, ProcessSource};
use crate::events::EventHub;
use crate::logindex::{list_logs, LogIndex};
use crate::managed::ManagedSessions;
use crate::matcher::match_sessions;
use crate::notify::{build_notification, NotificationRing};
use crate::titles::TitleStore;
use crate::tracker::TransitionTracker;

/// State shared between the poller and request handlers.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub hub: EventHub,
    pub managed: ManagedSessions,
    pub titles: Arc<Mutex<TitleStore>>,
    pub notifications: Arc<Mutex<NotificationRing>>,
    pub snapshot: watch::Receiver<Vec<Session>>,
}

impl SharedState {
    /// True if a session in the current snapshot runs as `pid`.
    pub fn is_session_pid(&self, pid: u32) -> bool {
        self.snapshot.borrow().iter().any(|s| s.pid == Some(pid))
    }
}

pub struct Poller {
    config: Arc<Config>,
    source: Arc<dyn ProcessSource>,
    index: LogIndex,
    tracker: TransitionTracker,
    shared: SharedState,
    snapshot: watch::Sender<Vec<Session>>,
}

impl Poller {
    /// Creates a poller and the shared state its consumers read.
    pub fn new(config: Arc<Config>, source: Arc<dyn ProcessSource>, hub: EventHub) -> (Self, SharedState) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());
        let shared = SharedState {
            hub,
            managed: ManagedSessions::new(),
            titles: Arc::new(Mutex::new(TitleStore::load(&config.titles_path))),
            notifications: Arc::new(Mutex::new(NotificationRing::new(config.notification_capacity))),
            snapshot: snapshot_rx,
        };
        let poller = Self {
            index: LogIndex::new(config.tail_entries),
            tracker: TransitionTracker::new(),
            config,
            source,
            shared: shared.clone(),
            snapshot: snapshot_tx,
        };
        (poller, shared)
    }

    /// Runs one poll cycle and returns the new snapshot.
    ///
    /// Returns `None` when the process scan failed and the tick was skipped.
    pub async fn tick(&mut self) -> Option<Vec<Session>> {
        let processes = match discovery::scan(Arc::clone(&self.source)).await {
            Ok(processes) => processes,
            Err(e) => {
                warn!(error = %e, "Process scan failed, skipping tick");
                return None;
            }
        };

        let projects_dir = self.config.projects_dir.clone();
        let settings_path = self.config.settings_path.clone();
        let (mut logs, checker) = match tokio::task::spawn_blocking(move || {
            (list_logs(&projects_dir), PermissionChecker::from_settings_file(&settings_path))
        })
        .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Log listing failed, skipping tick");
                return None;
            }
        };

        self.index.annotate(&mut logs);
        let managed = self.shared.managed.ids().await;
        let matches = match_sessions(
            &processes,
            logs,
            &managed,
            SystemTime::now(),
            self.config.recent_window(),
        );

        let paths: Vec<_> = matches.iter().map(|m| m.log.path.clone()).collect();
        self.index.refresh(&paths).await;

        let mut sessions = Vec::with_capacity(matches.len());
        {
            let titles = self.shared.titles.lock().await;
            for m in &matches {
                let Some(state) = self.index.get_mut(&m.log.path) else {
                    continue;
                };
                let classification = state.classify(&checker);
                let title = titles.get(&m.log.session_id).map(str::to_string);
                sessions.push(state.to_session(
                    &m.log,
                    m.process.as_ref(),
                    classification,
                    title,
                    managed.contains(&m.log.session_id),
                ));
            }
        }

        let transitions = self.tracker.observe(&sessions);

        self.snapshot.send_replace(sessions.clone());
        self.shared.hub.publish(ServerMessage::SessionsUpdated {
            data: sessions.clone(),
        });

        for transition in transitions {
            let notification = build_notification(transition.kind, &transition.session, &self.config.deep_link_scheme);
            info!(
                notification_id = %notification.notification_id,
                session_id = %notification.session_id,
                kind = ?notification.kind,
                "Notification fired"
            );
            self.shared.notifications.lock().await.push(notification.clone());
            self.shared
                .hub
                .publish(ServerMessage::NotificationFired { data: notification });
        }

        debug!(
            processes = processes.len(),
            sessions = sessions.len(),
            tracked = self.tracker.len(),
            "Poll tick complete"
        );
        Some(sessions)
    }

    /// Polls until cancelled.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.config.poll_interval_ms, "Poller started");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
