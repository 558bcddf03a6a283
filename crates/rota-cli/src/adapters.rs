//! Port implementations selected by configuration.
//!
//! The engines are synchronous; the HTTP clients are async. Each command
//! builds one [`Services`] which owns a small runtime and blocks on it for
//! every remote call.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;
use rota_core::MeetingRef;
use rota_core::ports::{
    DeleteOutcome, LiveParticipant, MeetingError, MeetingProvider, MeetingRequest, QueueError,
    ScheduleOutcome, TaskQueue, TaskRequest,
};
use rota_db::{Database, OutboxRecord};
use rota_remote::{Delivery, MeetingClient, TaskQueueClient, TokenSource, WebhookClient};
use serde_json::value::RawValue;
use tokio::runtime::{Handle, Runtime};
use uuid::Uuid;

use crate::config::{Config, MeetingsBackend, MeetingsConfig, QueueBackend};

/// Namespace for offline meeting ids, so the same request always maps to the same id.
const OFFLINE_NAMESPACE: Uuid = Uuid::from_u128(0x3c1d_9a52_7e0b_4f8e_a5d4_61f2_0b9c_7e13);

/// Stand-in provider used when no meeting service is configured.
///
/// Meetings get deterministic placeholder links; live moderation is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineMeetings;

impl MeetingProvider for OfflineMeetings {
    fn create_meeting(&self, request: &MeetingRequest) -> Result<MeetingRef, MeetingError> {
        let key = format!(
            "{}|{}|{}",
            request.host,
            request.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            request.topic
        );
        let id = Uuid::new_v5(&OFFLINE_NAMESPACE, key.as_bytes()).to_string();
        tracing::debug!(meeting_id = %id, host = %request.host, "created offline meeting");
        Ok(MeetingRef {
            join_url: format!("offline://meetings/{id}"),
            meeting_id: id,
        })
    }

    fn list_participants(&self, _meeting_id: &str) -> Result<Vec<LiveParticipant>, MeetingError> {
        Ok(Vec::new())
    }

    fn mute_participant(
        &self,
        _meeting_id: &str,
        _participant_id: &str,
    ) -> Result<(), MeetingError> {
        Err(offline())
    }

    fn remove_participant(
        &self,
        _meeting_id: &str,
        _participant_id: &str,
    ) -> Result<(), MeetingError> {
        Err(offline())
    }
}

fn offline() -> MeetingError {
    MeetingError::Misconfigured("no meeting provider is configured".to_string())
}

/// Meeting provider over HTTP, blocking on the command's runtime.
#[derive(Debug)]
pub struct HttpMeetings {
    handle: Handle,
    client: MeetingClient,
}

impl MeetingProvider for HttpMeetings {
    fn create_meeting(&self, request: &MeetingRequest) -> Result<MeetingRef, MeetingError> {
        self.handle
            .block_on(self.client.create_meeting(request))
            .map_err(MeetingError::from)
    }

    fn list_participants(&self, meeting_id: &str) -> Result<Vec<LiveParticipant>, MeetingError> {
        self.handle
            .block_on(self.client.list_participants(meeting_id))
            .map_err(MeetingError::from)
    }

    fn mute_participant(&self, meeting_id: &str, participant_id: &str) -> Result<(), MeetingError> {
        self.handle
            .block_on(self.client.mute_participant(meeting_id, participant_id))
            .map_err(MeetingError::from)
    }

    fn remove_participant(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), MeetingError> {
        self.handle
            .block_on(self.client.remove_participant(meeting_id, participant_id))
            .map_err(MeetingError::from)
    }
}

/// Hosted task queue over HTTP.
#[derive(Debug)]
pub struct HttpQueue {
    handle: Handle,
    client: TaskQueueClient,
}

impl TaskQueue for HttpQueue {
    fn schedule(&self, task: &TaskRequest) -> Result<ScheduleOutcome, QueueError> {
        self.handle
            .block_on(self.client.schedule(task))
            .map_err(QueueError::from)
    }

    fn delete(&self, name: &str) -> Result<DeleteOutcome, QueueError> {
        self.handle
            .block_on(self.client.delete(name))
            .map_err(QueueError::from)
    }
}

enum Meetings {
    Offline(OfflineMeetings),
    Http(HttpMeetings),
}

/// External collaborators for one command invocation.
pub struct Services {
    // Kept alive for the handles held by the HTTP adapters.
    runtime: Runtime,
    meetings: Meetings,
    queue: Option<HttpQueue>,
    webhook: Option<WebhookClient>,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        // `Handle::block_on` only drives IO when worker threads exist.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let timeout = config.request_timeout();

        let meetings = match config.meetings.backend {
            MeetingsBackend::Offline => Meetings::Offline(OfflineMeetings),
            MeetingsBackend::Http => {
                let settings = &config.meetings;
                let base_url = required(settings.base_url.as_deref(), "meetings.base_url")?;
                let client = MeetingClient::new(base_url, meeting_token(settings)?, timeout)
                    .context("failed to configure meeting provider")?;
                Meetings::Http(HttpMeetings {
                    handle: runtime.handle().clone(),
                    client,
                })
            }
        };

        let queue = match config.queue.backend {
            QueueBackend::Local => None,
            QueueBackend::Http => {
                let base_url = required(config.queue.base_url.as_deref(), "queue.base_url")?;
                let token = required(config.queue.token.as_deref(), "queue.token")?;
                let token = Arc::new(TokenSource::fixed(token)?);
                let client = TaskQueueClient::new(base_url, token, timeout)
                    .context("failed to configure task queue")?;
                Some(HttpQueue {
                    handle: runtime.handle().clone(),
                    client,
                })
            }
        };

        let webhook = config
            .notifications
            .webhook_url
            .as_deref()
            .map(|url| WebhookClient::new(url, timeout))
            .transpose()
            .context("failed to configure notification webhook")?;

        Ok(Self {
            runtime,
            meetings,
            queue,
            webhook,
        })
    }

    pub fn meetings(&self) -> &dyn MeetingProvider {
        match &self.meetings {
            Meetings::Offline(offline) => offline,
            Meetings::Http(http) => http,
        }
    }

    /// The configured queue; the local table when no hosted queue is set.
    pub fn queue<'a>(&'a self, db: &'a Database) -> &'a dyn TaskQueue {
        match &self.queue {
            Some(http) => http,
            None => db,
        }
    }

    pub const fn uses_local_queue(&self) -> bool {
        self.queue.is_none()
    }

    /// Posts one outbox event to the webhook. Returns `false` when no webhook
    /// is configured and the event was only logged.
    pub fn deliver(&self, record: &OutboxRecord) -> Result<bool> {
        let Some(webhook) = &self.webhook else {
            tracing::info!(
                event_id = %record.event_id,
                kind = %record.kind,
                payload = %record.payload,
                "event"
            );
            return Ok(false);
        };
        let event = RawValue::from_string(record.payload.clone())
            .with_context(|| format!("outbox event {} is not valid JSON", record.event_id))?;
        self.runtime.block_on(webhook.deliver(&Delivery {
            id: &record.event_id,
            kind: &record.kind,
            event: &event,
        }))?;
        Ok(true)
    }
}

fn meeting_token(settings: &MeetingsConfig) -> Result<Arc<TokenSource>> {
    let source = match (
        &settings.token_url,
        &settings.client_id,
        &settings.client_secret,
        &settings.token,
    ) {
        (Some(url), Some(id), Some(secret), _) => TokenSource::client_credentials(url, id, secret)?,
        (_, _, _, Some(token)) => TokenSource::fixed(token)?,
        _ => bail!(
            "meetings.backend = \"http\" needs token_url, client_id and client_secret, or a token"
        ),
    };
    Ok(Arc::new(source))
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{key} must be set for the http backend"),
    }
}
