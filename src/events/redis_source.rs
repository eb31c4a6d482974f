use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashSet;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, trace};
use crate::error::Result;
use crate::events::{EventSource, JobEvent};

/// Event source fed by a relay that pushes socket messages onto one Redis
/// list per queue (`<prefix>:<queue_id>`).
pub struct RedisEventSource {
    client: redis::Client,
    prefix: String,
    joined: DashSet<String>,
}

impl RedisEventSource {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            joined: DashSet::new(),
        }
    }

    pub fn open(url: &str, prefix: impl Into<String>) -> Result<Self> {
        Ok(Self::new(redis::Client::open(url)?, prefix))
    }

    fn queue_key(&self, queue_id: &str) -> String {
        format!("{}:{}", self.prefix, queue_id)
    }

    /// Relay side: push one wire message for `queue_id`.
    pub async fn publish(&self, queue_id: &str, message: &Value) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(message)?;
        let _: () = conn.lpush(self.queue_key(queue_id), serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for RedisEventSource {
    async fn join(&self, queue_id: &str) -> Result<()> {
        debug!(key = %self.queue_key(queue_id), "Listening on event list");
        self.joined.insert(queue_id.to_string());
        Ok(())
    }

    async fn leave(&self, queue_id: &str) -> Result<()> {
        self.joined.remove(queue_id);
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<JobEvent>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        loop {
            let keys: Vec<String> = self.joined.iter().map(|q| self.queue_key(q.key())).collect();
            if keys.is_empty() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            // 1s timeout so newly joined queues are picked up.
            let popped: Option<(String, String)> = conn.brpop(&keys, 1.0).await?;
            let Some((key, payload)) = popped else {
                continue;
            };
            match JobEvent::from_json(&payload) {
                Some(event) => return Ok(Some(event)),
                None => trace!(%key, "Dropping unrecognised event message"),
            }
        }
    }
}
