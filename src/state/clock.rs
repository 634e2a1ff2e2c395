//! Server-side answer deadlines.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::{sync::mpsc, task::AbortHandle, time::sleep};
use tracing::debug;
use uuid::Uuid;

/// Per-match countdown timers.
///
/// Each armed match owns one sleeping task; when it wakes up the match id is pushed on the
/// expiry channel consumed by the deadline worker. Re-arming replaces the previous timer.
pub struct MatchClock {
    timers: DashMap<Uuid, AbortHandle>,
    expired: mpsc::UnboundedSender<Uuid>,
}

impl MatchClock {
    /// Build a clock and the receiving end of its expiry channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (expired, receiver) = mpsc::unbounded_channel();
        (
            Self {
                timers: DashMap::new(),
                expired,
            },
            receiver,
        )
    }

    /// Fire `match_id` on the expiry channel once `deadline` is reached.
    pub fn arm(&self, match_id: Uuid, deadline: SystemTime) {
        let wait = deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        self.arm_after(match_id, wait);
    }

    /// Fire `match_id` on the expiry channel after `wait`.
    pub fn arm_after(&self, match_id: Uuid, wait: Duration) {
        let expired = self.expired.clone();
        let task = tokio::spawn(async move {
            sleep(wait).await;
            debug!(match_id = %match_id, "match deadline reached");
            let _ = expired.send(match_id);
        });

        if let Some(previous) = self.timers.insert(match_id, task.abort_handle()) {
            previous.abort();
        }
    }

    /// Cancel the timer of `match_id`, if any.
    pub fn disarm(&self, match_id: Uuid) {
        if let Some((_, handle)) = self.timers.remove(&match_id) {
            handle.abort();
        }
    }

    /// Whether a timer is registered for `match_id` and has not fired yet.
    pub fn is_armed(&self, match_id: Uuid) -> bool {
        self.timers
            .get(&match_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of registered timers.
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}
