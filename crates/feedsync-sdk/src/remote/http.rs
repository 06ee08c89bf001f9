//! HTTP adapter for the remote query API
//!
//! Endpoints (relative to `base_url`):
//! - `GET /owners/{owner}/items?after={id}&order=asc&page={n}&per_page={k}` → `[RemoteItem]`
//! - `GET /owners/{owner}/items/count?after={id}` → `{"count": n}`
//!
//! Status codes are mapped onto the error taxonomy: 429/5xx transient,
//! other non-success fatal, undecodable bodies malformed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::RemoteSource;
use crate::error::{FeedSyncError, Result};
use crate::model::{CountQuery, PageQuery, RemoteItem};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRemoteConfig {
    pub base_url: String,
    /// Connect timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Optional bearer token sent with every request
    pub bearer_token: Option<String>,
    pub user_agent: String,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            connect_timeout_secs: 10,
            bearer_token: None,
            user_agent: format!("feedsync-sdk/{}", crate::version::SDK_VERSION),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// JSON-over-HTTP [`RemoteSource`].
///
/// Request timeouts are enforced per fetch by the worker pool, not here.
pub struct HttpRemoteSource {
    client: Client,
    config: HttpRemoteConfig,
}

impl HttpRemoteSource {
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FeedSyncError::Config(format!("failed to build HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "HTTP remote source created");
        Ok(Self { client, config })
    }

    /// `{base}/owners/{owner}/items[/{suffix}]`, owner percent-encoded.
    fn items_url(&self, owner: &str, suffix: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| FeedSyncError::Config(format!("invalid base_url: {}", e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FeedSyncError::Config("base_url cannot carry a path".to_string()))?;
            segments.pop_if_empty().extend(["owners", owner, "items"]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FeedSyncError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<RemoteItem>> {
        debug!(owner = %query.owner, page = query.page, after = query.after_id, "GET items page");
        let response = self
            .get(self.items_url(&query.owner, None)?)
            .query(&[
                ("after", query.after_id.to_string()),
                ("order", "asc".to_string()),
                ("page", query.page.to_string()),
                ("per_page", query.page_size.to_string()),
            ])
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let items: Vec<RemoteItem> = response.json().await?;
        Ok(items)
    }

    async fn count(&self, query: &CountQuery) -> Result<u64> {
        let response = self
            .get(self.items_url(&query.owner, Some("count"))?)
            .query(&[("after", query.after_id.to_string())])
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let body: CountResponse = response.json().await?;
        Ok(body.count)
    }
}
