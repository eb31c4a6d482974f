use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use crate::config::ClientConfig;
use crate::error::Result;

/// Remote storage of generated artifacts.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>>;
    async fn list_names(&self, collection: &str) -> Result<Vec<String>>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpAssetStore {
    client: Client,
    config: ClientConfig,
}

impl HttpAssetStore {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.config.api_url(&format!("images/i/{}/full", name));
        debug!(%url, "Fetching asset");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn list_names(&self, collection: &str) -> Result<Vec<String>> {
        let url = self.config.api_url(&format!("boards/{}/image_names", collection));
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<Vec<String>>().await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.config.api_url(&format!("images/i/{}", name));
        debug!(%url, "Deleting asset");
        self.client.delete(&url).send().await?.error_for_status()?;
        Ok(())
    }
}
