use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    state::SharedState,
};

/// Subscribe to the lobby stream of open-match changes.
pub fn subscribe_lobby(state: &SharedState) -> broadcast::Receiver<ServerEvent> {
    state.lobby_sse().subscribe()
}

/// Subscribe to the transitions of one match, failing when the match does not exist.
pub async fn subscribe_match(
    state: &SharedState,
    match_id: Uuid,
) -> Result<broadcast::Receiver<ServerEvent>, ServiceError> {
    // Subscribe before the lookup so no transition slips between the two.
    let receiver = state.match_sse().subscribe();
    let store = state.store().await?;
    match store.find_match(match_id).await? {
        Some(_) => Ok(receiver),
        None => Err(ServiceError::MatchNotFound),
    }
}

/// Identifies the target SSE stream so the forwarder can filter and log per stream.
#[derive(Clone, Copy)]
pub enum StreamKind {
    Lobby,
    /// Only events tagged with this match id are forwarded.
    Match(Uuid),
}

impl StreamKind {
    fn name(&self) -> &'static str {
        match self {
            StreamKind::Lobby => "lobby",
            StreamKind::Match(_) => "match",
        }
    }

    fn accepts(&self, event: &ServerEvent) -> bool {
        match self {
            StreamKind::Lobby => true,
            StreamKind::Match(id) => event.match_id.is_none_or(|match_id| match_id == *id),
        }
    }
}

/// Convert a broadcast receiver into an SSE response, opening with a handshake and
/// forwarding events until the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    kind: StreamKind,
    degraded: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(handshake) = handshake_event(kind, degraded) {
            if tx.send(Ok(handshake)).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if !kind.accepts(&payload) {
                                continue;
                            }
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(stream = kind.name(), skipped, "SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Lobby => tracing::info!("Lobby SSE stream disconnected"),
            StreamKind::Match(id) => {
                tracing::info!(match_id = %id, "Match SSE stream disconnected")
            }
        }
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn handshake_event(kind: StreamKind, degraded: bool) -> Option<Event> {
    let message = match kind {
        StreamKind::Lobby => "lobby stream connected".to_string(),
        StreamKind::Match(id) => format!("match {id} stream connected"),
    };
    let handshake = Handshake {
        stream: kind.name().to_string(),
        message,
        degraded,
    };
    let data = serde_json::to_string(&handshake).ok()?;
    Some(Event::default().event("handshake").data(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_streams_filter_foreign_events() {
        let mine = Uuid::new_v4();
        let kind = StreamKind::Match(mine);
        let own = ServerEvent::json(Some("match.started".into()), Some(mine), &()).unwrap();
        let foreign =
            ServerEvent::json(Some("match.started".into()), Some(Uuid::new_v4()), &()).unwrap();
        let global = ServerEvent::new(Some("system_status".into()), "{}".into());

        assert!(kind.accepts(&own));
        assert!(!kind.accepts(&foreign));
        assert!(kind.accepts(&global));
        assert!(StreamKind::Lobby.accepts(&foreign));
    }
}
