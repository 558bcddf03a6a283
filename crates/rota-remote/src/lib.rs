//! HTTP clients for rota's external collaborators.
//!
//! Provides async clients for:
//! - The meeting provider (create meetings, live participant moderation)
//! - A hosted deferred-task queue
//! - The notification webhook that receives outbox events
//!
//! Credentials are held by a [`TokenSource`] that the composing process
//! creates once and shares between clients, so a cached access token is
//! reused until it nears expiry.

mod meetings;
mod tasks;
mod token;
mod webhook;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use rota_core::ports::{MeetingError, QueueError};
use serde::Deserialize;
use thiserror::Error;

pub use meetings::MeetingClient;
pub use tasks::TaskQueueClient;
pub use token::TokenSource;
pub use webhook::{Delivery, WebhookClient};

/// Default request timeout for API calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote client errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Required configuration is missing or blank.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Credentials were rejected even after refreshing the token.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Errors an operator has to fix before retrying makes sense.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::ClientBuild(_) | Self::Unauthorized { .. }
        )
    }
}

impl From<RemoteError> for MeetingError {
    fn from(err: RemoteError) -> Self {
        if err.is_configuration() {
            return Self::Misconfigured(err.to_string());
        }
        match err {
            RemoteError::Api { status, message } => Self::Rejected { status, message },
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<RemoteError> for QueueError {
    fn from(err: RemoteError) -> Self {
        if err.is_configuration() {
            Self::Misconfigured(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(RemoteError::ClientBuild)
}

fn require(value: &str, reason: &'static str) -> Result<(), RemoteError> {
    if value.trim().is_empty() {
        return Err(RemoteError::InvalidConfig { reason });
    }
    Ok(())
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// A response body with its status, read fully.
struct Reply {
    status: StatusCode,
    body: String,
}

impl Reply {
    fn error(&self) -> RemoteError {
        let message = parse_api_message(&self.body).unwrap_or_else(|| self.body.clone());
        if self.status == StatusCode::UNAUTHORIZED || self.status == StatusCode::FORBIDDEN {
            return RemoteError::Unauthorized { message };
        }
        RemoteError::Api {
            status: self.status.as_u16(),
            message,
        }
    }

    fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_str(&self.body)
            .map_err(|err| RemoteError::InvalidResponse(err.to_string()))
    }
}

fn parse_api_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        message: String,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .map(|payload| payload.message)
}

/// HTTP client plus bearer credentials, shared by the API clients.
#[derive(Debug, Clone)]
struct Authorized {
    http: reqwest::Client,
    token: Arc<TokenSource>,
}

impl Authorized {
    /// Sends the request built by `build`, refreshing the token once on a 401.
    async fn send(
        &self,
        build: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<Reply, RemoteError> {
        let token = self.token.bearer(&self.http).await?;
        let mut response = build(&self.http, &token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("access token rejected, refreshing");
            self.token.invalidate().await;
            let token = self.token.bearer(&self.http).await?;
            response = build(&self.http, &token).send().await?;
        }
        let status = response.status();
        let body = response.text().await?;
        Ok(Reply { status, body })
    }
}
