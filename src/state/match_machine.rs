use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lifecycle status of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Created by a first player whose stake is escrowed; waiting for an opponent.
    Waiting,
    /// Both stakes are escrowed and the answer window is open.
    InProgress,
    /// A single caller holds the settlement lease and is committing the payout.
    Settling,
    /// Settled; winner and payout are final.
    Completed,
    /// Never acquired an opponent; the creator's stake is refunded.
    Cancelled,
}

impl MatchStatus {
    /// Stable storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::InProgress => "in_progress",
            MatchStatus::Settling => "settling",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation produced by [`MatchStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(MatchStatus::Waiting),
            "in_progress" => Some(MatchStatus::InProgress),
            "settling" => Some(MatchStatus::Settling),
            "completed" => Some(MatchStatus::Completed),
            "cancelled" => Some(MatchStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether no further transition can leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }
}

/// Events that move a match through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
    /// A second player joined and their stake was debited.
    OpponentJoined,
    /// Both answer slots are decided; try to take the settlement lease.
    BeginSettlement,
    /// The settlement commit failed; hand the lease back.
    SettlementAborted,
    /// Payout, counters and closure were committed.
    SettlementCommitted,
    /// The creator gave up waiting or the waiting window expired.
    Cancel,
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Status the match was in.
    pub from: MatchStatus,
    /// Rejected event.
    pub event: MatchEvent,
}

/// A validated transition, applied by the store as a compare-and-set on `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status the store must still observe for the transition to apply.
    pub from: MatchStatus,
    /// Status written when the compare-and-set succeeds.
    pub to: MatchStatus,
    /// Event that produced the transition.
    pub event: MatchEvent,
}

/// Validate `event` against `from` and describe the resulting transition.
pub fn plan(from: MatchStatus, event: MatchEvent) -> Result<Transition, InvalidTransition> {
    let to = match (from, event) {
        (MatchStatus::Waiting, MatchEvent::OpponentJoined) => MatchStatus::InProgress,
        (MatchStatus::Waiting, MatchEvent::Cancel) => MatchStatus::Cancelled,
        (MatchStatus::InProgress, MatchEvent::BeginSettlement) => MatchStatus::Settling,
        (MatchStatus::Settling, MatchEvent::SettlementAborted) => MatchStatus::InProgress,
        (MatchStatus::Settling, MatchEvent::SettlementCommitted) => MatchStatus::Completed,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(Transition { from, to, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(from: MatchStatus, event: MatchEvent) -> MatchStatus {
        plan(from, event).unwrap().to
    }

    #[test]
    fn full_happy_path_through_match() {
        let status = step(MatchStatus::Waiting, MatchEvent::OpponentJoined);
        assert_eq!(status, MatchStatus::InProgress);
        let status = step(status, MatchEvent::BeginSettlement);
        assert_eq!(status, MatchStatus::Settling);
        let status = step(status, MatchEvent::SettlementCommitted);
        assert_eq!(status, MatchStatus::Completed);
        assert!(status.is_terminal());
    }

    #[test]
    fn aborted_settlement_returns_lease() {
        let status = step(MatchStatus::Settling, MatchEvent::SettlementAborted);
        assert_eq!(status, MatchStatus::InProgress);
        assert_eq!(
            step(status, MatchEvent::BeginSettlement),
            MatchStatus::Settling
        );
    }

    #[test]
    fn only_waiting_matches_can_be_cancelled() {
        assert_eq!(
            step(MatchStatus::Waiting, MatchEvent::Cancel),
            MatchStatus::Cancelled
        );

        let err = plan(MatchStatus::InProgress, MatchEvent::Cancel).unwrap_err();
        assert_eq!(err.from, MatchStatus::InProgress);
        assert_eq!(err.event, MatchEvent::Cancel);
    }

    #[test]
    fn settlement_cannot_start_twice() {
        let err = plan(MatchStatus::Settling, MatchEvent::BeginSettlement).unwrap_err();
        assert_eq!(err.from, MatchStatus::Settling);
    }

    #[test]
    fn terminal_statuses_reject_every_event() {
        let events = [
            MatchEvent::OpponentJoined,
            MatchEvent::BeginSettlement,
            MatchEvent::SettlementAborted,
            MatchEvent::SettlementCommitted,
            MatchEvent::Cancel,
        ];
        for status in [MatchStatus::Completed, MatchStatus::Cancelled] {
            for event in events {
                assert!(plan(status, event).is_err(), "{status:?} accepted {event:?}");
            }
        }
    }

    #[test]
    fn storage_names_round_trip() {
        for status in [
            MatchStatus::Waiting,
            MatchStatus::InProgress,
            MatchStatus::Settling,
            MatchStatus::Completed,
            MatchStatus::Cancelled,
        ] {
            assert_eq!(MatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MatchStatus::parse("paused"), None);
    }
}
