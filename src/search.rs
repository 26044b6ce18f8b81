//! Web search retrieval: one Custom Search API query, then a sequential
//! fetch of each returned link, reduced to visible page text.
//!
//! Provider failures surface as errors so the caller can decide policy;
//! an API response with no items is a success with zero results. Pages
//! that fail to fetch are skipped, producing a shorter result set.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::SearchConfig;
use crate::core::errors::ApiError;
use crate::extract::{extract_visible_text, truncate_chars};

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Clone, Serialize)]
pub struct PageContext {
    pub text: String,
    pub url: String,
}

#[async_trait]
pub trait SearchRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PageContext>, ApiError>;
}

pub struct GoogleSearchRetriever {
    client: Client,
    api_key: String,
    engine_id: String,
    max_page_chars: usize,
}

impl GoogleSearchRetriever {
    pub fn new(config: &SearchConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            engine_id: config.engine_id.clone(),
            max_page_chars: config.max_page_chars,
        })
    }

    async fn search_links(&self, query: &str) -> Result<Vec<String>, ApiError> {
        let url = format!(
            "{}?key={}&cx={}&q={}",
            SEARCH_ENDPOINT,
            self.api_key,
            self.engine_id,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "search request failed: {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await.map_err(ApiError::internal)?;

        // No `items` key means the engine found nothing, not that it failed.
        let items = payload
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| item.get("link").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn fetch_page(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("skipping {}: fetch failed: {}", url, err);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("skipping {}: status {}", url, response.status());
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!("skipping {}: body read failed: {}", url, err);
                return None;
            }
        };

        let text = extract_visible_text(&body);
        if text.is_empty() {
            return None;
        }

        Some(truncate_chars(text, self.max_page_chars))
    }
}

#[async_trait]
impl SearchRetriever for GoogleSearchRetriever {
    async fn retrieve(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PageContext>, ApiError> {
        let links = self.search_links(query).await?;

        let mut contexts = Vec::new();
        for url in links.into_iter().take(max_results) {
            if let Some(text) = self.fetch_page(&url).await {
                contexts.push(PageContext { text, url });
            }
        }

        tracing::debug!("retrieved {} context pages for query", contexts.len());
        Ok(contexts)
    }
}
