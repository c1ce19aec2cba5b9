//! Broadcast creation collaborator
//!
//! The engine asks a [`BroadcastCreator`] for a broadcast and a stream key each
//! time a definition fires. Failures come back classified so that only
//! transient network problems are retried.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::BroadcastApiConfig;
use crate::errors::{BroadcastError, BroadcastResult};
use crate::models::{BroadcastCreated, BroadcastRequest};

#[async_trait]
pub trait BroadcastCreator: Send + Sync {
    async fn create(&self, request: &BroadcastRequest) -> BroadcastResult<BroadcastCreated>;
}

/// Posts broadcast requests as JSON to a configured endpoint
#[derive(Debug, Clone)]
pub struct HttpBroadcastCreator {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpBroadcastCreator {
    pub fn new(config: &BroadcastApiConfig) -> BroadcastResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("stream-scheduler/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                BroadcastError::InvalidConfig(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl BroadcastCreator for HttpBroadcastCreator {
    async fn create(&self, request: &BroadcastRequest) -> BroadcastResult<BroadcastCreated> {
        debug!(
            "Requesting broadcast '{}' for schedule {} at {}",
            request.title, request.schedule_definition_id, request.scheduled_start
        );

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if status.is_success() {
            // A garbled success may still have created the broadcast; never retry it
            return response.json::<BroadcastCreated>().await.map_err(|e| {
                BroadcastError::InvalidConfig(format!("unreadable broadcast response: {e}"))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_status(status, &body);
        warn!(
            "Broadcast API rejected request for schedule {} with {} ({})",
            request.schedule_definition_id,
            status,
            error.kind()
        );
        Err(error)
    }
}

/// Map an HTTP error response to a broadcast error class
pub fn classify_status(status: StatusCode, body: &str) -> BroadcastError {
    let detail = format!("{} {}", status.as_u16(), summarize(body));

    // Quota errors are reported as 403 by some platforms
    if status == StatusCode::TOO_MANY_REQUESTS
        || body.contains("quotaExceeded")
        || body.contains("rateLimitExceeded")
    {
        return BroadcastError::Quota(detail);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BroadcastError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT => BroadcastError::TransientNetwork(detail),
        s if s.is_server_error() => BroadcastError::TransientNetwork(detail),
        _ => BroadcastError::InvalidConfig(detail),
    }
}

fn classify_transport_error(error: reqwest::Error) -> BroadcastError {
    if error.is_builder() {
        BroadcastError::InvalidConfig(error.to_string())
    } else {
        BroadcastError::TransientNetwork(error.to_string())
    }
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        format!("{}...", trimmed.chars().take(200).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
