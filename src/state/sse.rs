use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// SSE-specific sub-state carved out from [`AppState`](super::AppState).
pub struct SseState {
    lobby: SseHub,
    matches: SseHub,
}

impl SseState {
    /// Build the SSE sub-tree with per-stream channel capacities.
    pub fn new(lobby_capacity: usize, matches_capacity: usize) -> Self {
        Self {
            lobby: SseHub::new(lobby_capacity),
            matches: SseHub::new(matches_capacity),
        }
    }

    /// Hub carrying open-match list changes.
    pub fn lobby(&self) -> &SseHub {
        &self.lobby
    }

    /// Hub carrying per-match transitions; subscribers filter on the match id.
    pub fn matches(&self) -> &SseHub {
        &self.matches
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}
