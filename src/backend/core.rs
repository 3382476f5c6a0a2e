use std::time::Duration;

use anyhow::{Error, Result};
use async_trait::async_trait;

use super::public::{
    ChatRequest, ErrorEvent, HealthResponse, MessageMetricsEvent, MetricsSummary, ModelInfo,
};
use crate::core::AppConfig;
use crate::metrics::MetricsSink;

/// HTTP client for the chat service.
///
/// Only connecting is bounded by a timeout. A reply stream is read for
/// as long as the server keeps it open.
#[derive(Clone, Debug)]
pub struct ChatApi {
    base_url: String,
    client: reqwest::Client,
}

impl ChatApi {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Self::new(&config.api_url, config.connect_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issues a chat request and returns as soon as the status and
    /// headers are in. The status is not checked here so the caller
    /// can categorize failures.
    pub async fn chat(&self, request: &ChatRequest) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(self.url("/chat"))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
    }

    /// Asks the service which model it is running. `Ok(None)` means the
    /// service answered but didn't say.
    pub async fn model_info(&self) -> Result<Option<ModelInfo>, Error> {
        let resp: HealthResponse = self
            .client
            .get(self.url("/health"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.model_info)
    }

    pub async fn metrics_summary(&self) -> Result<MetricsSummary, Error> {
        let summary = self
            .client
            .get(self.url("/metrics/summary"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(summary)
    }
}

#[async_trait]
impl MetricsSink for ChatApi {
    async fn log_metrics(&self, event: &MessageMetricsEvent) -> Result<(), Error> {
        self.client
            .post(self.url("/metrics/log"))
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn log_error(&self, event: &ErrorEvent) -> Result<(), Error> {
        self.client
            .post(self.url("/metrics/error"))
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
