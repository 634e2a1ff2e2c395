use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::MatchEntity,
    dto::{
        matches::MatchView,
        sse::{AnswerRecordedEvent, MatchChangedEvent, ServerEvent, SystemStatus},
    },
    state::{SharedState, match_machine::MatchStatus},
};

const EVENT_MATCH_CREATED: &str = "match.created";
const EVENT_MATCH_STARTED: &str = "match.started";
const EVENT_MATCH_ANSWERED: &str = "match.answered";
const EVENT_MATCH_SETTLED: &str = "match.settled";
const EVENT_MATCH_CANCELLED: &str = "match.cancelled";
const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Announce a new open match in the lobby.
pub fn broadcast_match_created(state: &SharedState, record: &MatchEntity) {
    let payload = changed(record);
    send_lobby_event(state, EVENT_MATCH_CREATED, Some(record.id), &payload);
    send_match_event(state, EVENT_MATCH_CREATED, record.id, &payload);
}

/// Announce that an opponent joined and the answer window is open.
pub fn broadcast_match_started(state: &SharedState, record: &MatchEntity) {
    let payload = changed(record);
    send_lobby_event(state, EVENT_MATCH_STARTED, Some(record.id), &payload);
    send_match_event(state, EVENT_MATCH_STARTED, record.id, &payload);
}

/// Tell a match's watchers that a slot was decided, without revealing the answer.
pub fn broadcast_answer_recorded(
    state: &SharedState,
    match_id: Uuid,
    account_id: Uuid,
    timed_out: bool,
    status: MatchStatus,
) {
    let payload = AnswerRecordedEvent {
        match_id,
        account_id,
        timed_out,
        status,
    };
    send_match_event(state, EVENT_MATCH_ANSWERED, match_id, &payload);
}

/// Publish the final result of a match.
pub fn broadcast_match_settled(state: &SharedState, record: &MatchEntity) {
    let payload = changed(record);
    send_match_event(state, EVENT_MATCH_SETTLED, record.id, &payload);
}

/// Remove a cancelled match from the lobby and notify its watchers.
pub fn broadcast_match_cancelled(state: &SharedState, record: &MatchEntity) {
    let payload = changed(record);
    send_lobby_event(state, EVENT_MATCH_CANCELLED, Some(record.id), &payload);
    send_match_event(state, EVENT_MATCH_CANCELLED, record.id, &payload);
}

/// Broadcast degraded mode changes on every stream.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    let payload = SystemStatus { degraded };
    send_lobby_event(state, EVENT_SYSTEM_STATUS, None, &payload);
    match ServerEvent::json(Some(EVENT_SYSTEM_STATUS.to_string()), None, &payload) {
        Ok(event) => state.match_sse().broadcast(event),
        Err(err) => warn!(error = %err, "failed to serialize system status payload"),
    }
}

fn changed(record: &MatchEntity) -> MatchChangedEvent {
    MatchChangedEvent {
        record: MatchView::from(record.clone()),
    }
}

fn send_lobby_event(
    state: &SharedState,
    event: &str,
    match_id: Option<Uuid>,
    payload: &impl Serialize,
) {
    match ServerEvent::json(Some(event.to_string()), match_id, payload) {
        Ok(event) => state.lobby_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize lobby SSE payload"),
    }
}

fn send_match_event(state: &SharedState, event: &str, match_id: Uuid, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), Some(match_id), payload) {
        Ok(event) => state.match_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize match SSE payload"),
    }
}
