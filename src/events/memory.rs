use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;
use crate::error::{Error, Result};
use crate::events::{EventSource, JobEvent};

/// In-process event source. Embedders bridging their own socket connection
/// push raw messages through `publish`.
pub struct InMemoryEventSource {
    sender: mpsc::UnboundedSender<JobEvent>,
    receiver: Mutex<mpsc::UnboundedReceiver<JobEvent>>,
    joined: DashSet<String>,
}

impl Default for InMemoryEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: tx,
            receiver: Mutex::new(rx),
            joined: DashSet::new(),
        }
    }

    pub fn is_joined(&self, queue_id: &str) -> bool {
        self.joined.contains(queue_id)
    }

    /// Push one wire message. Returns whether it was accepted: unknown event
    /// names and events of queues nobody joined are dropped.
    pub fn publish(&self, message: &Value) -> Result<bool> {
        let Some(event) = JobEvent::parse(message) else {
            trace!("Dropping unrecognised event message");
            return Ok(false);
        };
        if let Some(queue_id) = &event.queue_id {
            if !self.joined.contains(queue_id) {
                trace!(%queue_id, event = %event.name, "Dropping event for a queue not joined");
                return Ok(false);
            }
        }
        self.sender
            .send(event)
            .map_err(|e| Error::Events(format!("Event channel closed: {}", e)))?;
        Ok(true)
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn join(&self, queue_id: &str) -> Result<()> {
        self.joined.insert(queue_id.to_string());
        Ok(())
    }

    async fn leave(&self, queue_id: &str) -> Result<()> {
        self.joined.remove(queue_id);
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<JobEvent>> {
        let mut rx = self.receiver.lock().await;
        Ok(rx.recv().await)
    }
}
