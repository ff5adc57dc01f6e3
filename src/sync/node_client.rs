use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::source::{BlockSource, FullBlock, NodeHeader, NodeInfo, NodeOutput};
use crate::config::NodeSettings;
use crate::error::NodeError;
use crate::models::{HeaderId, Height};
use crate::utils::retry::Backoff;

#[derive(Clone)]
pub struct NodeClient {
    pub url: String,
    client: Client,
    api_key: Option<String>,
    backoff: Backoff,
}

impl NodeClient {
    pub fn new(settings: &NodeSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            url: settings.url.trim_end_matches('/').to_string(),
            client,
            api_key: settings.api_key.clone(),
            backoff: Backoff::new(settings.max_retries, settings.backoff_ms),
        })
    }

    fn build_request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.url, path);
        let mut req = self.client.get(&url);

        if let Some(ref key) = self.api_key {
            req = req.header("api_key", key);
        }

        req
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        let resp = self.build_request(path).send().await?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(NodeError::NotFound(path.to_string())),
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                return Err(NodeError::Transient(format!("{path}: {status}")))
            }
            status => return Err(NodeError::Invalid(format!("{path}: {status}"))),
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            let excerpt: String = text.chars().take(200).collect();
            NodeError::Invalid(format!("{path}: {e}. Response: {excerpt}"))
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        self.backoff.retry(path, || self.get_once(path)).await
    }

    pub async fn info(&self) -> Result<NodeInfo, NodeError> {
        self.get("/info").await
    }
}

#[async_trait]
impl BlockSource for NodeClient {
    async fn best_height(&self) -> Result<Height, NodeError> {
        let info = self.info().await?;
        info.full_height
            .map(Height)
            .ok_or_else(|| NodeError::Transient("node has no full blocks yet".into()))
    }

    async fn headers_at(&self, height: Height) -> Result<Vec<HeaderId>, NodeError> {
        self.get(&format!("/blocks/at/{}", height)).await
    }

    async fn header(&self, id: &HeaderId) -> Result<NodeHeader, NodeError> {
        self.get(&format!("/blocks/{}/header", id)).await
    }

    async fn block(&self, id: &HeaderId) -> Result<FullBlock, NodeError> {
        self.get(&format!("/blocks/{}", id)).await
    }

    async fn genesis_boxes(&self) -> Result<Vec<NodeOutput>, NodeError> {
        self.get("/utxo/genesis").await
    }
}
