//! Outbound notification webhook.

use std::time::Duration;

use serde::Serialize;
use serde_json::value::RawValue;

use crate::{RemoteError, build_http, require};

/// One outbox event on its way out. `event` is forwarded without re-encoding.
#[derive(Debug, Serialize)]
pub struct Delivery<'a> {
    pub id: &'a str,
    pub kind: &'a str,
    pub event: &'a RawValue,
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
}

impl WebhookClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        require(url, "webhook URL cannot be empty")?;
        Ok(Self {
            http: build_http(timeout)?,
            url: url.to_string(),
        })
    }

    /// Posts one event. The event id doubles as the idempotency key.
    pub async fn deliver(&self, delivery: &Delivery<'_>) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(&self.url)
            .header("Idempotency-Key", delivery.id)
            .json(delivery)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        tracing::debug!(event_id = delivery.id, kind = delivery.kind, "delivered event");
        Ok(())
    }
}
