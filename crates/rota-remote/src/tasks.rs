//! Hosted deferred-task queue client.

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::StatusCode;
use rota_core::TaskPayload;
use rota_core::ports::{DeleteOutcome, ScheduleOutcome, TaskRequest};
use serde::Serialize;

use crate::{Authorized, RemoteError, TokenSource, build_http, require, trim_base};

#[derive(Debug, Clone)]
pub struct TaskQueueClient {
    api: Authorized,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateTaskBody<'a> {
    name: &'a str,
    schedule_time: String,
    http_request: HttpTarget<'a>,
}

#[derive(Debug, Serialize)]
struct HttpTarget<'a> {
    url: &'a str,
    http_method: &'static str,
    body: &'a TaskPayload,
}

impl TaskQueueClient {
    pub fn new(
        base_url: &str,
        token: Arc<TokenSource>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        require(base_url, "task queue URL cannot be empty")?;
        Ok(Self {
            api: Authorized {
                http: build_http(timeout)?,
                token,
            },
            base_url: trim_base(base_url),
        })
    }

    /// Registers a task. A 409 means the name is taken, which is success.
    pub async fn schedule(&self, task: &TaskRequest) -> Result<ScheduleOutcome, RemoteError> {
        let body = CreateTaskBody {
            name: &task.name,
            schedule_time: task.fire_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            http_request: HttpTarget {
                url: &task.callback_url,
                http_method: "POST",
                body: &task.payload,
            },
        };
        let url = format!("{}/tasks", self.base_url);
        let reply = self
            .api
            .send(|http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        match reply.status {
            StatusCode::CONFLICT => Ok(ScheduleOutcome::AlreadyExists),
            status if status.is_success() => Ok(ScheduleOutcome::Created),
            _ => Err(reply.error()),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome, RemoteError> {
        let url = format!("{}/tasks/{name}", self.base_url);
        let reply = self
            .api
            .send(|http, token| http.delete(&url).bearer_auth(token))
            .await?;
        match reply.status {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            _ => Err(reply.error()),
        }
    }
}
