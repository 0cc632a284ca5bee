//! A [`SyncHandler`] for a JSON REST sync endpoint.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `POST /sync/{namespace}/actions` submits one action
//! - `GET /sync/{namespace}/changes?since={ms}` lists server changes
//! - `GET /sync/{namespace}/entities/{entity}/{key}` fetches one entity;
//!   404 means the server has deleted it
//!
//! Failures are classified by status: 409 is a conflict, other 4xx are
//! validation errors except 401/403/408/429, which are treated as temporary
//! along with 5xx and transport errors. An error body of
//! `{"code", "message", "remote"}` refines the classification when present.

use crate::conflict::RemoteSnapshot;
use crate::error::{ErrorCode, HandlerError, SyncError, SyncResult};
use crate::handler::{HandlerResult, SubmitRequest, SubmitResponse, SyncHandler};
use async_trait::async_trait;
use caresync_types::{Namespace, Timestamp};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for one namespace's endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpHandlerConfig {
    /// Base URL of the sync API (e.g. `https://api.example.com/v1`).
    pub base_url: String,
    pub namespace: Namespace,
    /// Per-request timeout (ms).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Sent as `Authorization: Bearer ...` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl HttpHandlerConfig {
    pub fn new(base_url: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            base_url: base_url.into(),
            namespace,
            timeout_ms: default_timeout_ms(),
            bearer_token: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    code: Option<ErrorCode>,
    message: Option<String>,
    remote: Option<RemoteSnapshot>,
}

#[derive(Debug, Deserialize)]
struct ChangesBody {
    changes: Vec<RemoteSnapshot>,
}

/// Submits actions to a REST endpoint with `reqwest`.
pub struct HttpSyncHandler {
    config: HttpHandlerConfig,
    client: Client,
}

impl HttpSyncHandler {
    pub fn new(config: HttpHandlerConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpHandlerConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/sync/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(self.config.namespace.as_str()),
            path
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> HandlerResult<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| HandlerError::unavailable(format!("request failed: {e}")))
    }
}

/// Maps an HTTP status to a failure classification.
pub fn classify_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => ErrorCode::Unavailable,
        s if s.is_client_error() => ErrorCode::Validation,
        s if s.is_server_error() => ErrorCode::Unavailable,
        _ => ErrorCode::Internal,
    }
}

async fn error_from(response: Response) -> HandlerError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body.message.unwrap_or_else(|| {
        if text.trim().is_empty() {
            status.to_string()
        } else {
            text.trim().to_string()
        }
    });
    HandlerError {
        code: body.code.unwrap_or_else(|| classify_status(status)),
        message,
        remote: body.remote,
    }
}

fn decode_error(e: reqwest::Error) -> HandlerError {
    HandlerError::internal(format!("malformed response: {e}"))
}

#[async_trait]
impl SyncHandler for HttpSyncHandler {
    async fn submit(&self, request: &SubmitRequest) -> HandlerResult<SubmitResponse> {
        let url = self.url("actions");
        debug!(%url, id = %request.action_id, operation = %request.operation, "submitting action");
        let response = self.send(self.client.post(&url).json(request)).await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response.json().await.map_err(decode_error)
    }

    async fn fetch_remote(&self, entity: &str, key: &str) -> HandlerResult<Option<RemoteSnapshot>> {
        let url = self.url(&format!(
            "entities/{}/{}",
            urlencoding::encode(entity),
            urlencoding::encode(key)
        ));
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Some(RemoteSnapshot::deleted(entity, key, Timestamp::EPOCH)));
        }
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response.json().await.map(Some).map_err(decode_error)
    }

    async fn fetch_changes(&self, since: Timestamp) -> HandlerResult<Vec<RemoteSnapshot>> {
        let url = self.url("changes");
        let response = self
            .send(self.client.get(&url).query(&[("since", since.as_millis())]))
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        let body: ChangesBody = response.json().await.map_err(decode_error)?;
        Ok(body.changes)
    }
}
