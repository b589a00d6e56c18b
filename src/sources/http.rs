//! REST backend for the task queue, record store and stop action.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ExecutionControl, RecordPayload, RecordStore, SourceError, TaskQueue, TaskStatusPayload};
use crate::config::ApiConfig;
use crate::status::ExecutionId;

/// HTTP client for the platform API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::Transport(format!("invalid base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::Transport(format!("base url {} cannot carry a path", base_url)));
        }
        Ok(Self { client, base_url })
    }

    pub fn from_config(api: &ApiConfig) -> Result<Self, SourceError> {
        Self::new(&api.base_url, Duration::from_millis(api.request_timeout_ms))
    }

    /// Append percent-encoded segments to the base URL. A trailing empty
    /// segment yields the trailing slash the platform routes expect.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, id: &str) -> Result<T, SourceError> {
        debug!(%url, "GET");
        let resp = self.client.get(url).send().await.map_err(transport)?;
        decode(resp, id).await
    }
}

fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

async fn decode<T: DeserializeOwned>(resp: Response, id: &str) -> Result<T, SourceError> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound { id: id.to_string() });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SourceError::Remote {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
}

#[async_trait]
impl TaskQueue for HttpBackend {
    async fn task_status(&self, handle: &str) -> Result<TaskStatusPayload, SourceError> {
        match self
            .get_json(self.url(&["tasks", handle, "status", ""]), handle)
            .await
        {
            // An unknown handle means the queue lost track of the job; the
            // record store can still answer, so this is not fatal here.
            Err(SourceError::NotFound { .. }) => Err(SourceError::Remote {
                status: 404,
                body: format!("task {} unknown to queue", handle),
            }),
            other => other,
        }
    }
}

#[async_trait]
impl RecordStore for HttpBackend {
    async fn fetch_record(&self, id: &ExecutionId) -> Result<RecordPayload, SourceError> {
        self.get_json(self.url(&["test-cases", id.as_str(), ""]), id.as_str())
            .await
    }
}

#[async_trait]
impl ExecutionControl for HttpBackend {
    async fn stop(&self, id: &ExecutionId) -> Result<RecordPayload, SourceError> {
        let url = self.url(&["test-cases", id.as_str(), "stop", ""]);
        debug!(%url, "POST");
        let resp = self.client.post(url).send().await.map_err(transport)?;
        decode(resp, id.as_str()).await
    }
}
