use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::queue::{EnqueueBatchRequest, EnqueueBatchResponse, QueueApi, QueueItem};

/// `QueueApi` over the service's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpQueueClient {
    client: Client,
    config: ClientConfig,
}

impl HttpQueueClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()?;
        debug!(base_url = %config.base_url, queue_id = %config.queue_id, "Created queue client");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn item_url(&self, item_id: i64, suffix: &str) -> String {
        self.config
            .api_url(&format!("queue/{}/i/{}{}", self.config.queue_id, item_id, suffix))
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, url: String) -> Result<T> {
        debug!(%method, %url, "Queue request");
        let response = self.client.request(method, &url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

/// Remote diagnostic body: JSON when it parses, raw text otherwise.
async fn diagnostic(response: Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[async_trait]
impl QueueApi for HttpQueueClient {
    fn queue_id(&self) -> &str {
        &self.config.queue_id
    }

    async fn enqueue_batch(&self, request: &EnqueueBatchRequest) -> Result<EnqueueBatchResponse> {
        let url = self
            .config
            .api_url(&format!("queue/{}/enqueue_batch", self.config.queue_id));
        debug!(%url, batch_id = %request.batch.batch_id, runs = request.batch.runs, "Enqueueing batch");

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let diagnostic = diagnostic(response).await;
            warn!(status = status.as_u16(), batch_id = %request.batch.batch_id, %diagnostic, "Submission rejected");
            return Err(Error::SubmissionRejected {
                status: status.as_u16(),
                diagnostic,
                payload: Box::new(serde_json::to_value(request)?),
            });
        }

        let accepted: EnqueueBatchResponse = response.json().await?;
        info!(
            batch_id = %accepted.batch.batch_id,
            items = accepted.item_ids.len(),
            enqueued = accepted.enqueued,
            "Batch enqueued"
        );
        Ok(accepted)
    }

    async fn get_queue_item(&self, item_id: i64) -> Result<QueueItem> {
        self.request(Method::GET, self.item_url(item_id, "")).await
    }

    async fn cancel_queue_item(&self, item_id: i64) -> Result<QueueItem> {
        info!(item_id, "Canceling queue item");
        self.request(Method::PUT, self.item_url(item_id, "/cancel")).await
    }
}
