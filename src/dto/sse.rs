use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dto::matches::MatchView, state::match_machine::MatchStatus};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
    /// Match the event belongs to; per-match streams only forward their own match.
    pub match_id: Option<Uuid>,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, match_id: Option<Uuid>, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
            match_id,
        })
    }

    /// Build an event whose data is plain text.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self {
            event,
            data,
            match_id: None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream (`lobby` or `match`).
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast on every match lifecycle change (created, started, settled, cancelled).
pub struct MatchChangedEvent {
    #[serde(rename = "match")]
    pub record: MatchView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast on a match stream when one participant's slot is decided.
pub struct AnswerRecordedEvent {
    pub match_id: Uuid,
    pub account_id: Uuid,
    pub timed_out: bool,
    pub status: MatchStatus,
}
