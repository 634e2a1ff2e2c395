//! Exactly-once settlement of decided matches.
//!
//! A settlement takes the `in_progress -> settling` lease through a compare-and-set, judges
//! the answers and commits payout, statistics and closure in a single store operation. A
//! failed commit hands the lease back so a later trigger can retry.

use std::time::SystemTime;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        ledger_store::SettlementCommit,
        models::{LedgerCategory, LedgerEntryEntity, MatchEntity, MatchOutcome, StatsDelta},
        storage::StorageError,
    },
    error::ServiceError,
    services::{analytics, judge, sse_events},
    state::{
        SharedState,
        match_machine::{MatchEvent, MatchStatus, plan},
    },
};

/// Split of the pot between the winner and the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    /// Combined stakes.
    pub pot: u64,
    /// Rake kept by the platform, rounded down.
    pub fee: u64,
    /// Amount credited to the winner.
    pub payout: u64,
}

/// Compute `pot = 2 × stake`, `fee = floor(pot × rake / 100)` and `payout = pot − fee`.
///
/// Returns `None` when the pot does not fit in a balance.
pub fn compute_payout(stake: u64, rake_percent: u8) -> Option<Payout> {
    let pot = u128::from(stake) * 2;
    let fee = pot * u128::from(rake_percent.min(100)) / 100;
    Some(Payout {
        pot: u64::try_from(pot).ok()?,
        fee: u64::try_from(fee).ok()?,
        payout: u64::try_from(pot - fee).ok()?,
    })
}

/// Result of a settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call committed the settlement; carries the completed match.
    Settled(MatchEntity),
    /// The match was already completed.
    AlreadySettled,
    /// Another caller holds the settlement lease; re-read the match later.
    Conflict,
    /// At least one answer slot is still open.
    Undecided,
}

/// Settle `match_id` if both slots are decided. Safe to call any number of times.
pub async fn settle(state: &SharedState, match_id: Uuid) -> Result<SettleOutcome, ServiceError> {
    let store = state.store().await?;
    let Some(record) = store.find_match(match_id).await? else {
        return Err(ServiceError::MatchNotFound);
    };

    match record.status {
        MatchStatus::InProgress => {}
        MatchStatus::Completed => return Ok(SettleOutcome::AlreadySettled),
        MatchStatus::Settling => return Ok(SettleOutcome::Conflict),
        status @ (MatchStatus::Waiting | MatchStatus::Cancelled) => {
            return Err(ServiceError::MatchNotActive(status));
        }
    }
    if !record.all_decided() {
        return Ok(SettleOutcome::Undecided);
    }

    let now = SystemTime::now();
    let lease = plan(record.status, MatchEvent::BeginSettlement)?;
    if !store.transition_match(match_id, lease, now).await? {
        return Ok(SettleOutcome::Conflict);
    }

    // Answers are immutable once recorded, so the snapshot read above is still accurate.
    let outcome = judge::judge(&record.participants[0], &record.participants[1]);
    let commit = match build_commit(&record, outcome, now) {
        Ok(commit) => commit,
        Err(err) => {
            release_lease(state, match_id).await;
            return Err(err);
        }
    };

    match store.commit_settlement(commit.clone()).await {
        Ok(true) => {}
        Ok(false) => return Ok(SettleOutcome::Conflict),
        Err(err) => {
            error!(match_id = %match_id, error = %err, "settlement commit failed");
            release_lease(state, match_id).await;
            return Err(err.into());
        }
    }

    let mut settled = record;
    apply_commit(&mut settled, &commit);
    state.clock().disarm(match_id);

    info!(
        match_id = %match_id,
        outcome = ?commit.outcome,
        payout = commit.payout,
        house_take = commit.house_take,
        "match settled"
    );

    if let Some(job) = analytics::summarize(&settled, now) {
        state.analytics().enqueue(job);
    }
    sse_events::broadcast_match_settled(state, &settled);

    Ok(SettleOutcome::Settled(settled))
}

/// Give a held lease back after a failed commit. If this fails too, the sweeper recovers
/// the lease once it is stale.
async fn release_lease(state: &SharedState, match_id: Uuid) {
    let Ok(abort) = plan(MatchStatus::Settling, MatchEvent::SettlementAborted) else {
        return;
    };
    let result = match state.store().await {
        Ok(store) => store
            .transition_match(match_id, abort, SystemTime::now())
            .await
            .map_err(ServiceError::from),
        Err(err) => Err(err),
    };

    match result {
        Ok(true) => info!(match_id = %match_id, "settlement lease released for retry"),
        Ok(false) => warn!(match_id = %match_id, "settlement lease already gone"),
        Err(err) => warn!(
            match_id = %match_id,
            error = %err,
            "failed to release settlement lease; leaving it to the sweeper"
        ),
    }
}

/// Describe every write of the settlement of `record` with the given outcome.
pub fn build_commit(
    record: &MatchEntity,
    outcome: MatchOutcome,
    now: SystemTime,
) -> Result<SettlementCommit, ServiceError> {
    if record.participants.len() != 2 {
        return Err(StorageError::corrupted(format!(
            "match `{}` has {} participants at settlement",
            record.id,
            record.participants.len()
        ))
        .into());
    }
    let split = compute_payout(record.stake, record.policy.rake_percent).ok_or_else(|| {
        StorageError::corrupted(format!("pot of match `{}` overflows", record.id))
    })?;

    let refund_both = || -> Result<Vec<LedgerEntryEntity>, ServiceError> {
        record
            .participants
            .iter()
            .map(|participant| {
                ledger_entry(
                    record,
                    participant.account_id,
                    record.stake,
                    LedgerCategory::StakeRefund,
                    now,
                )
            })
            .collect()
    };

    let (credits, payout, house_take) = match outcome {
        MatchOutcome::Winner { account_id } => {
            let credits = if split.payout > 0 {
                vec![ledger_entry(
                    record,
                    account_id,
                    split.payout,
                    LedgerCategory::WinCredit,
                    now,
                )?]
            } else {
                Vec::new()
            };
            (credits, split.payout, split.fee)
        }
        MatchOutcome::Push => (refund_both()?, 0, 0),
        MatchOutcome::NoWinner if record.policy.refund_on_no_winner => (refund_both()?, 0, 0),
        MatchOutcome::NoWinner => (Vec::new(), 0, split.pot),
    };

    let stats = record
        .participants
        .iter()
        .map(|participant| {
            let won = outcome.winner() == Some(participant.account_id);
            let answer = participant.answer.as_ref();
            StatsDelta {
                account_id: participant.account_id,
                won,
                response_ms: answer
                    .filter(|answer| !answer.timed_out)
                    .map(|answer| answer.elapsed_ms),
                correct_ms: answer
                    .filter(|answer| answer.correct)
                    .map(|answer| answer.elapsed_ms),
                credits_earned: if won { payout } else { 0 },
            }
        })
        .collect();

    Ok(SettlementCommit {
        match_id: record.id,
        outcome,
        payout,
        house_take,
        credits,
        stats,
        completed_at: now,
    })
}

fn ledger_entry(
    record: &MatchEntity,
    account_id: Uuid,
    amount: u64,
    category: LedgerCategory,
    now: SystemTime,
) -> Result<LedgerEntryEntity, ServiceError> {
    let signed = i64::try_from(amount)
        .map_err(|_| StorageError::corrupted(format!("amount {amount} exceeds ledger range")))?;
    let description = match category {
        LedgerCategory::WinCredit => format!("Won match {}", record.id),
        LedgerCategory::StakeRefund => format!("Refunded stake of match {}", record.id),
        _ => format!("Settlement of match {}", record.id),
    };
    Ok(LedgerEntryEntity::new(
        account_id,
        signed,
        category,
        Some(record.id),
        description,
        now,
    ))
}

fn apply_commit(record: &mut MatchEntity, commit: &SettlementCommit) {
    record.status = MatchStatus::Completed;
    record.outcome = Some(commit.outcome);
    record.payout = commit.payout;
    record.house_take = commit.house_take;
    record.completed_at = Some(commit.completed_at);
    record.settling_since = None;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::{AppConfig, CreditsConfig},
        dao::{
            ledger_store::{AnswerWrite, LedgerStore, memory::MemoryLedgerStore},
            models::{AccountEntity, AnswerEntity, MatchPolicy, MatchPromptEntity, ParticipantEntity},
        },
        state::test_support::memory_state,
    };

    struct Duel {
        state: SharedState,
        store: MemoryLedgerStore,
        match_id: Uuid,
        a: Uuid,
        b: Uuid,
        _channels: crate::state::WorkerChannels,
    }

    fn config(refund_on_no_winner: bool) -> AppConfig {
        AppConfig::new(
            MatchPolicy {
                refund_on_no_winner,
                ..MatchPolicy::default()
            },
            CreditsConfig::default(),
            Vec::new(),
        )
    }

    /// Two funded accounts with both stakes escrowed in an in-progress match.
    async fn duel(stake: u64, refund_on_no_winner: bool) -> Duel {
        let config = config(refund_on_no_winner);
        let policy = config.policy();
        let (state, store, channels) = memory_state(config).await;
        let now = SystemTime::now();

        let first = AccountEntity::new("a".into(), 250, now);
        let second = AccountEntity::new("b".into(), 250, now);
        let (a, b) = (first.id, second.id);
        store.insert_account(first, None).await.unwrap();
        store.insert_account(second, None).await.unwrap();

        let match_id = Uuid::new_v4();
        store.reserve_stake(a, stake, match_id, now).await.unwrap();
        store.reserve_stake(b, stake, match_id, now).await.unwrap();
        store
            .insert_match(MatchEntity::open(match_id, a, stake, policy, now))
            .await
            .unwrap();
        store
            .start_match(
                match_id,
                ParticipantEntity::new(b, now),
                MatchPromptEntity {
                    id: Uuid::new_v4(),
                    title: "You Are My Sunshine".into(),
                    artist: "Jimmie Davis".into(),
                    lyrics_snippet: "You are my ____".into(),
                    answer: "sunshine".into(),
                },
                now,
                now + Duration::from_secs(30),
            )
            .await
            .unwrap()
            .unwrap();

        Duel {
            state,
            store,
            match_id,
            a,
            b,
            _channels: channels,
        }
    }

    impl Duel {
        async fn answer(&self, account_id: Uuid, text: &str, elapsed_ms: u64) {
            let write = self
                .store
                .record_answer(
                    self.match_id,
                    account_id,
                    AnswerEntity {
                        text: Some(text.into()),
                        submitted_at: SystemTime::now(),
                        correct: judge::is_correct(text, "sunshine"),
                        elapsed_ms,
                        timed_out: false,
                    },
                )
                .await
                .unwrap();
            assert!(matches!(write, AnswerWrite::Recorded(_)));
        }

        async fn balance(&self, account_id: Uuid) -> u64 {
            self.store
                .find_account(account_id)
                .await
                .unwrap()
                .unwrap()
                .balance
        }
    }

    #[test]
    fn payout_and_fee_always_add_up_to_the_pot() {
        for stake in [1, 7, 50, 99, 100, 333, 10_000, u64::MAX / 2] {
            for rake in [0, 1, 3, 10, 33, 50, 99, 100] {
                let split = compute_payout(stake, rake).unwrap();
                assert_eq!(split.pot, stake * 2);
                assert_eq!(split.payout + split.fee, split.pot, "stake {stake} rake {rake}");
            }
        }
    }

    #[test]
    fn fee_is_rounded_down() {
        let split = compute_payout(55, 10).unwrap();
        assert_eq!(split.fee, 11);
        let split = compute_payout(7, 10).unwrap();
        assert_eq!(split.fee, 1);
        assert_eq!(split.payout, 13);
        assert!(compute_payout(u64::MAX, 10).is_none());
    }

    #[tokio::test]
    async fn faster_correct_player_takes_pot_minus_rake() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "sunshine", 3_000).await;
        duel.answer(duel.b, "sunset", 7_000).await;

        let outcome = settle(&duel.state, duel.match_id).await.unwrap();

        let SettleOutcome::Settled(settled) = outcome else {
            panic!("expected a settlement");
        };
        assert_eq!(settled.status, MatchStatus::Completed);
        assert_eq!(settled.winner_id(), Some(duel.a));
        assert_eq!(settled.payout, 180);
        assert_eq!(settled.house_take, 20);
        assert_eq!(duel.balance(duel.a).await, 150 + 180);
        assert_eq!(duel.balance(duel.b).await, 150);

        let stored = duel.store.find_match(duel.match_id).await.unwrap().unwrap();
        assert_eq!(stored, settled);

        let winner = duel.store.find_account(duel.a).await.unwrap().unwrap();
        assert_eq!((winner.games_played, winner.wins, winner.current_streak), (1, 1, 1));
        assert_eq!(winner.total_credits_earned, 180);
        let loser = duel.store.find_account(duel.b).await.unwrap().unwrap();
        assert_eq!((loser.games_played, loser.wins, loser.current_streak), (1, 0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_triggers_settle_exactly_once() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "sunshine", 3_000).await;
        duel.answer(duel.b, "sunshine", 4_000).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = duel.state.clone();
                let match_id = duel.match_id;
                tokio::spawn(async move { settle(&state, match_id).await.unwrap() })
            })
            .collect();

        let mut settled = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), SettleOutcome::Settled(_)) {
                settled += 1;
            }
        }

        assert_eq!(settled, 1);
        assert_eq!(duel.balance(duel.a).await, 150 + 180);
        let credits = duel.store.list_ledger(duel.a).await.unwrap();
        assert_eq!(
            credits
                .iter()
                .filter(|entry| entry.category == LedgerCategory::WinCredit)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn settling_a_completed_match_is_a_no_op() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "sunshine", 3_000).await;
        duel.answer(duel.b, "sunset", 7_000).await;

        settle(&duel.state, duel.match_id).await.unwrap();
        let again = settle(&duel.state, duel.match_id).await.unwrap();

        assert_eq!(again, SettleOutcome::AlreadySettled);
        assert_eq!(duel.balance(duel.a).await, 330);
    }

    #[tokio::test]
    async fn undecided_match_is_left_alone() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "sunshine", 3_000).await;

        let outcome = settle(&duel.state, duel.match_id).await.unwrap();

        assert_eq!(outcome, SettleOutcome::Undecided);
        let stored = duel.store.find_match(duel.match_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::InProgress);
    }

    #[tokio::test]
    async fn failed_commit_hands_the_lease_back() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "sunshine", 3_000).await;
        duel.answer(duel.b, "sunset", 7_000).await;
        duel.store.fail_next_settlements(1);

        let err = settle(&duel.state, duel.match_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));

        let stored = duel.store.find_match(duel.match_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::InProgress);
        assert_eq!(stored.settling_since, None);
        assert_eq!(duel.balance(duel.a).await, 150);

        let retry = settle(&duel.state, duel.match_id).await.unwrap();
        assert!(matches!(retry, SettleOutcome::Settled(_)));
        assert_eq!(duel.balance(duel.a).await, 330);
    }

    #[tokio::test]
    async fn tie_refunds_both_stakes_without_fee() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "Sunshine", 5_000).await;
        duel.answer(duel.b, " sunshine ", 5_000).await;

        let SettleOutcome::Settled(settled) = settle(&duel.state, duel.match_id).await.unwrap()
        else {
            panic!("expected a settlement");
        };

        assert_eq!(settled.outcome, Some(MatchOutcome::Push));
        assert_eq!(settled.house_take, 0);
        assert_eq!(duel.balance(duel.a).await, 250);
        assert_eq!(duel.balance(duel.b).await, 250);
    }

    #[tokio::test]
    async fn nobody_correct_keeps_stakes_by_default() {
        let duel = duel(100, false).await;
        duel.answer(duel.a, "sunset", 2_000).await;
        duel.answer(duel.b, "moonlight", 3_000).await;

        let SettleOutcome::Settled(settled) = settle(&duel.state, duel.match_id).await.unwrap()
        else {
            panic!("expected a settlement");
        };

        assert_eq!(settled.outcome, Some(MatchOutcome::NoWinner));
        assert_eq!(settled.house_take, 200);
        assert_eq!(duel.balance(duel.a).await, 150);
        assert_eq!(duel.balance(duel.b).await, 150);
    }

    #[tokio::test]
    async fn nobody_correct_refunds_when_policy_says_so() {
        let duel = duel(100, true).await;
        duel.answer(duel.a, "sunset", 2_000).await;
        duel.answer(duel.b, "moonlight", 3_000).await;

        settle(&duel.state, duel.match_id).await.unwrap();

        assert_eq!(duel.balance(duel.a).await, 250);
        assert_eq!(duel.balance(duel.b).await, 250);
    }
}
