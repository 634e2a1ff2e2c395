//! Periodic recovery pass over non-terminal matches.
//!
//! Timers live in memory, so after a restart (or a missed trigger) the sweeper is what
//! guarantees that every match eventually reaches a terminal status.

use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    services::{
        match_service,
        settlement::{self, SettleOutcome},
    },
    state::{
        SharedState,
        match_machine::{MatchEvent, MatchStatus, plan},
    },
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Age after which a `settling` lease is considered abandoned.
pub const SETTLEMENT_LEASE: Duration = Duration::from_secs(30);

/// What a single sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Waiting matches cancelled after their waiting window.
    pub expired: usize,
    /// Matches settled by this pass.
    pub settled: usize,
    /// Deadline timers re-armed.
    pub rearmed: usize,
    /// Abandoned settlement leases handed back.
    pub recovered: usize,
    /// Refunds still outstanding after the retry.
    pub outstanding_refunds: usize,
}

/// Run [`sweep_once`] forever, skipping passes while degraded.
pub async fn run(state: SharedState) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if state.is_degraded() {
            continue;
        }
        match sweep_once(&state, SystemTime::now()).await {
            Ok(report) if report != SweepReport::default() => {
                info!(?report, "match sweep completed");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "match sweep failed"),
        }
    }
}

/// Expire, settle, re-arm and recover every match that needs it as of `now`.
pub async fn sweep_once(state: &SharedState, now: SystemTime) -> Result<SweepReport, ServiceError> {
    let store = state.store().await?;
    let mut report = SweepReport {
        expired: match_service::expire_waiting(state, now).await?,
        ..SweepReport::default()
    };

    for record in store.list_matches(MatchStatus::Settling).await? {
        let stale = record
            .settling_since
            .is_none_or(|since| since + SETTLEMENT_LEASE <= now);
        if !stale {
            continue;
        }
        let abort = plan(MatchStatus::Settling, MatchEvent::SettlementAborted)?;
        if store.transition_match(record.id, abort, now).await? {
            warn!(match_id = %record.id, "recovered abandoned settlement lease");
            report.recovered += 1;
        }
    }

    for record in store.list_matches(MatchStatus::InProgress).await? {
        let match_id = record.id;
        let result = if record.all_decided() {
            settlement::settle(state, match_id).await.map(Some)
        } else if record.deadline_at.is_some_and(|deadline| deadline <= now) {
            match_service::handle_deadline(state, match_id).await
        } else {
            if let Some(deadline) = record.deadline_at {
                if !state.clock().is_armed(match_id) {
                    debug!(match_id = %match_id, "re-arming match deadline");
                    state.clock().arm(match_id, deadline);
                    report.rearmed += 1;
                }
            }
            Ok(None)
        };

        match result {
            Ok(Some(SettleOutcome::Settled(_))) => report.settled += 1,
            Ok(_) => {}
            Err(err) => warn!(match_id = %match_id, error = %err, "sweep could not resolve match"),
        }
    }

    report.outstanding_refunds = state.escrow().retry_outstanding(store.as_ref()).await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::{AppConfig, CreditsConfig},
        dao::{
            ledger_store::{LedgerStore, memory::MemoryLedgerStore},
            models::{AccountEntity, MatchPolicy, PromptEntity},
        },
        services::match_service::{create_match, get_match, join_match, submit_answer},
        state::{WorkerChannels, test_support::memory_state},
    };

    async fn setup() -> (SharedState, MemoryLedgerStore, WorkerChannels, Uuid, Uuid) {
        let config = AppConfig::new(MatchPolicy::default(), CreditsConfig::default(), Vec::new());
        let (state, store, channels) = memory_state(config).await;
        store
            .insert_prompt(PromptEntity {
                id: Uuid::new_v4(),
                title: "Daisy Bell".into(),
                artist: "Harry Dacre".into(),
                lyrics_snippet: "Daisy, Daisy, give me your ____ do".into(),
                answer: "answer".into(),
                active: true,
                times_played: 0,
                times_correct: 0,
                created_at: SystemTime::now(),
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let account = AccountEntity::new("player".into(), 250, SystemTime::now());
            ids.push(account.id);
            store.insert_account(account, None).await.unwrap();
        }
        (state, store, channels, ids[0], ids[1])
    }

    #[tokio::test]
    async fn overdue_match_is_timed_out_and_settled() {
        let (state, _store, _channels, a, b) = setup().await;
        let created = create_match(&state, a, 100).await.unwrap();
        join_match(&state, created.id, b).await.unwrap();
        submit_answer(&state, created.id, a, "answer".into()).await.unwrap();

        let later = SystemTime::now() + Duration::from_secs(31);
        let report = sweep_once(&state, later).await.unwrap();

        assert_eq!(report.settled, 1);
        let record = get_match(&state, created.id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner_id(), Some(a));
    }

    #[tokio::test]
    async fn lost_timer_is_rearmed() {
        let (state, _store, _channels, a, b) = setup().await;
        let created = create_match(&state, a, 100).await.unwrap();
        join_match(&state, created.id, b).await.unwrap();
        state.clock().disarm(created.id);

        let report = sweep_once(&state, SystemTime::now()).await.unwrap();

        assert_eq!(report.rearmed, 1);
        assert!(state.clock().is_armed(created.id));
    }

    #[tokio::test]
    async fn abandoned_lease_is_recovered_and_settled() {
        let (state, store, _channels, a, b) = setup().await;
        let created = create_match(&state, a, 100).await.unwrap();
        join_match(&state, created.id, b).await.unwrap();
        submit_answer(&state, created.id, a, "answer".into()).await.unwrap();
        // Take the lease and never commit, as a crashed settler would.
        let lease = plan(MatchStatus::InProgress, MatchEvent::BeginSettlement).unwrap();
        assert!(store.transition_match(created.id, lease, SystemTime::now()).await.unwrap());

        let fresh = sweep_once(&state, SystemTime::now()).await.unwrap();
        assert_eq!(fresh.recovered, 0);

        let later = SystemTime::now() + SETTLEMENT_LEASE + Duration::from_secs(1);
        let report = sweep_once(&state, later).await.unwrap();

        assert_eq!(report.recovered, 1);
        assert_eq!(report.settled, 1);
        let record = get_match(&state, created.id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner_id(), Some(a));
    }

    #[tokio::test]
    async fn expired_waiting_match_is_cancelled() {
        let (state, store, _channels, a, _b) = setup().await;
        let created = create_match(&state, a, 100).await.unwrap();

        let later = SystemTime::now() + MatchPolicy::default().waiting_expiry() + Duration::from_secs(1);
        let report = sweep_once(&state, later).await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(get_match(&state, created.id).await.unwrap().status, MatchStatus::Cancelled);
        assert_eq!(store.find_account(a).await.unwrap().unwrap().balance, 250);
    }
}
