//! Push message hub.
//!
//! Every push (`sessionsUpdated`, `streamEvent`, `streamEnd`,
//! `notificationFired`) is published once here and fanned out to every
//! transport subscriber. Slow subscribers lag and skip messages rather than
//! stall publishers.

use aw_protocol::ServerMessage;
use tokio::sync::broadcast;
use tracing::trace;

/// Push buffer per subscriber
const PUSH_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ServerMessage>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PUSH_BUFFER);
        Self { tx }
    }

    /// Publishes a push; a hub without subscribers drops it.
    pub fn publish(&self, message: ServerMessage) {
        match self.tx.send(message) {
            Ok(receivers) => trace!(receivers, "Published push"),
            Err(_) => trace!("Push dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        hub.publish(ServerMessage::SessionsUpdated { data: vec![] });

        assert_eq!(a.recv().await.unwrap(), ServerMessage::SessionsUpdated { data: vec![] });
        assert_eq!(b.recv().await.unwrap(), ServerMessage::SessionsUpdated { data: vec![] });
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventHub::new().publish(ServerMessage::Ok);
    }
}
