use std::fs;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

/// Connection settings for the remote generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub queue_id: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// `None` waits forever in blocking mode.
    pub wait_timeout_secs: Option<u64>,
    pub user_agent: String,
    /// Redis relay for queue events. No relay means no event modes.
    pub redis_url: Option<String>,
    pub event_channel_prefix: String,
    /// Node types removed from the execution graph before submission.
    pub non_executable_types: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090".to_string(),
            queue_id: "default".to_string(),
            request_timeout_secs: 30,
            poll_interval_ms: 500,
            wait_timeout_secs: None,
            user_agent: format!("flowgate/{}", env!("CARGO_PKG_VERSION")),
            redis_url: None,
            event_channel_prefix: "flowgate:events".to_string(),
            non_executable_types: vec![crate::graph::NOTES_NODE_TYPE.to_string()],
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_queue_id(mut self, queue_id: impl Into<String>) -> Self {
        self.queue_id = queue_id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Stored in whole seconds; a fraction rounds up so a short timeout never
    /// becomes zero.
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout_secs = timeout.map(|t| t.as_secs() + u64::from(t.subsec_nanos() > 0));
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    /// `{base_url}/api/v1/{path}` without doubled slashes.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub fn load_config_from_yaml(file_path: impl AsRef<Path>) -> Result<ClientConfig> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read config file from {}", file_path.display()))?;

    let config: ClientConfig = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize config from {}", file_path.display()))?;

    Ok(config)
}
