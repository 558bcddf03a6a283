//! Meeting provider REST client.

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use rota_core::MeetingRef;
use rota_core::ports::{BreakoutRoom, LiveParticipant, MeetingRequest};
use serde::{Deserialize, Serialize};

use crate::{Authorized, RemoteError, TokenSource, build_http, require, trim_base};

/// Scheduled (as opposed to instant or recurring) meeting.
const SCHEDULED_MEETING: u8 = 2;

#[derive(Debug, Clone)]
pub struct MeetingClient {
    api: Authorized,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateMeetingBody<'a> {
    topic: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    start_time: String,
    duration: i64,
    timezone: &'static str,
    settings: MeetingSettings<'a>,
}

#[derive(Debug, Serialize)]
struct MeetingSettings<'a> {
    join_before_host: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    breakout_room: Option<BreakoutSettings<'a>>,
}

#[derive(Debug, Serialize)]
struct BreakoutSettings<'a> {
    enable: bool,
    rooms: &'a [BreakoutRoom],
}

#[derive(Debug, Deserialize)]
struct CreatedMeeting {
    id: WireId,
    join_url: String,
}

/// Providers disagree on whether ids are numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ParticipantList {
    #[serde(default)]
    participants: Vec<WireParticipant>,
}

#[derive(Debug, Deserialize)]
struct WireParticipant {
    id: WireId,
    #[serde(alias = "user_name")]
    name: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct ParticipantAction {
    action: &'static str,
}

impl MeetingClient {
    pub fn new(
        base_url: &str,
        token: Arc<TokenSource>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        require(base_url, "meeting provider URL cannot be empty")?;
        Ok(Self {
            api: Authorized {
                http: build_http(timeout)?,
                token,
            },
            base_url: trim_base(base_url),
        })
    }

    /// Creates a scheduled meeting owned by `request.host`.
    pub async fn create_meeting(
        &self,
        request: &MeetingRequest,
    ) -> Result<MeetingRef, RemoteError> {
        let body = CreateMeetingBody {
            topic: &request.topic,
            kind: SCHEDULED_MEETING,
            start_time: request.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration: request.duration_minutes,
            timezone: "UTC",
            settings: MeetingSettings {
                join_before_host: true,
                breakout_room: (!request.breakout_rooms.is_empty()).then_some(BreakoutSettings {
                    enable: true,
                    rooms: &request.breakout_rooms,
                }),
            },
        };
        let url = format!("{}/users/{}/meetings", self.base_url, request.host);
        let reply = self
            .api
            .send(|http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        if !reply.status.is_success() {
            return Err(reply.error());
        }
        let created: CreatedMeeting = reply.json()?;
        tracing::info!(host = %request.host, topic = %request.topic, "created meeting");
        Ok(MeetingRef {
            meeting_id: created.id.into_string(),
            join_url: created.join_url,
        })
    }

    pub async fn list_participants(
        &self,
        meeting_id: &str,
    ) -> Result<Vec<LiveParticipant>, RemoteError> {
        let url = format!("{}/meetings/{meeting_id}/participants", self.base_url);
        let reply = self
            .api
            .send(|http, token| http.get(&url).bearer_auth(token))
            .await?;
        if !reply.status.is_success() {
            return Err(reply.error());
        }
        let list: ParticipantList = reply.json()?;
        Ok(list
            .participants
            .into_iter()
            .map(|p| LiveParticipant {
                id: p.id.into_string(),
                name: p.name,
                email: p.email,
            })
            .collect())
    }

    pub async fn mute_participant(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), RemoteError> {
        self.participant_action(meeting_id, participant_id, "mute")
            .await
    }

    pub async fn remove_participant(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), RemoteError> {
        self.participant_action(meeting_id, participant_id, "remove")
            .await
    }

    async fn participant_action(
        &self,
        meeting_id: &str,
        participant_id: &str,
        action: &'static str,
    ) -> Result<(), RemoteError> {
        let url = format!(
            "{}/meetings/{meeting_id}/participants/{participant_id}/status",
            self.base_url
        );
        let body = ParticipantAction { action };
        let reply = self
            .api
            .send(|http, token| http.put(&url).bearer_auth(token).json(&body))
            .await?;
        if !reply.status.is_success() {
            return Err(reply.error());
        }
        tracing::info!(meeting_id, participant_id, action, "moderated participant");
        Ok(())
    }
}
