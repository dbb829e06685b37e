//! Ordered writer for bridge output lines.
//!
//! Every producer (the control loop, each turn) pushes into one unbounded
//! queue drained by a single writer task, so lines never interleave and the
//! order in which messages are queued is the order they hit stdout.

use aw_protocol::BridgeMessage;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Cloneable handle for queueing output lines.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

impl OutputSink {
    /// Queues a message. Dropped silently once the writer is gone.
    pub fn send(&self, message: BridgeMessage) {
        if self.tx.send(message).is_err() {
            debug!("Output writer closed, dropping message");
        }
    }
}

/// Spawns the writer task. It ends once every sink clone is dropped.
pub fn spawn_writer<W>(writer: W) -> (OutputSink, JoinHandle<std::io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<BridgeMessage>();

    let handle = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to serialize output line");
                    continue;
                }
            };
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        writer.shutdown().await
    });

    (OutputSink { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_lines_keep_queue_order() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (sink, handle) = spawn_writer(client);

        sink.send(BridgeMessage::ack_ok("1"));
        sink.send(BridgeMessage::stream_end("S1", Ok(())));
        drop(sink);
        handle.await.unwrap().unwrap();

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"ack\""));
        assert!(lines[1].contains("\"type\":\"streamEnd\""));
    }
}
