//! In-process [`LedgerStore`] backend.
//!
//! All tables sit behind a single async mutex, so every trait method runs as one
//! serializable transaction. Writes that touch several records are staged first and
//! only published once every check passed.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, SystemTime},
};

#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AnswerWrite, GrantOutcome, LedgerStore, ReleaseOutcome, ReserveOutcome, SettlementCommit,
};
use crate::{
    dao::{
        models::{
            AccountEntity, AnswerEntity, LedgerCategory, LedgerEntryEntity, MatchAnalyticsEntity,
            MatchEntity, MatchPromptEntity, ParticipantEntity, PromptEntity,
        },
        storage::{StorageError, StorageResult},
    },
    state::match_machine::{MatchStatus, Transition},
};

#[cfg(test)]
fn take_injected(counter: &AtomicU32, message: &str) -> Option<StorageError> {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
        .ok()?;
    Some(StorageError::unavailable(
        message.into(),
        std::io::Error::other("injected"),
    ))
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, AccountEntity>,
    ledger: Vec<LedgerEntryEntity>,
    refunds: HashSet<(Uuid, Uuid)>,
    matches: HashMap<Uuid, MatchEntity>,
    prompts: IndexMap<Uuid, PromptEntity>,
    analytics: HashMap<Uuid, MatchAnalyticsEntity>,
}

/// Serializable in-memory store used for local runs and tests.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    tables: Arc<Mutex<Tables>>,
    #[cfg(test)]
    failing_settlements: Arc<AtomicU32>,
    #[cfg(test)]
    lost_match_acks: Arc<AtomicU32>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` settlement commits fail as if the backend went away.
    #[cfg(test)]
    pub(crate) fn fail_next_settlements(&self, count: u32) {
        self.failing_settlements.store(count, Ordering::SeqCst);
    }

    /// Apply the next `count` match inserts or joins, then report the connection as reset.
    #[cfg(test)]
    pub(crate) fn lose_next_match_acks(&self, count: u32) {
        self.lost_match_acks.store(count, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_settlement_failure(&self) -> Option<StorageError> {
        take_injected(&self.failing_settlements, "injected settlement failure")
    }

    #[cfg(not(test))]
    fn injected_settlement_failure(&self) -> Option<StorageError> {
        None
    }

    #[cfg(test)]
    fn injected_lost_ack(&self) -> Option<StorageError> {
        take_injected(&self.lost_match_acks, "connection reset after write")
    }

    #[cfg(not(test))]
    fn injected_lost_ack(&self) -> Option<StorageError> {
        None
    }

    async fn grant_free_credits(
        &self,
        account_id: Uuid,
        amount: u64,
        interval: Duration,
        now: SystemTime,
    ) -> StorageResult<GrantOutcome> {
        let signed_amount = signed(amount)?;
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        let Some(account) = tables.accounts.get_mut(&account_id) else {
            return Ok(GrantOutcome::UnknownAccount);
        };

        if let Some(last) = account.last_free_claim_at {
            let next_claim_at = last + interval;
            if now < next_claim_at {
                return Ok(GrantOutcome::TooEarly { next_claim_at });
            }
        }

        account.balance = credit(account.balance, amount)?;
        account.last_free_claim_at = Some(now);
        let balance = account.balance;

        tables.ledger.push(LedgerEntryEntity::new(
            account_id,
            signed_amount,
            LedgerCategory::FreeGrant,
            None,
            format!("Claimed {amount} free credits"),
            now,
        ));

        Ok(GrantOutcome::Granted { balance })
    }

    async fn reserve_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> StorageResult<ReserveOutcome> {
        let signed_amount = signed(amount)?;
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        let Some(account) = tables.accounts.get_mut(&account_id) else {
            return Ok(ReserveOutcome::UnknownAccount);
        };

        if account.balance < amount {
            return Ok(ReserveOutcome::Insufficient);
        }

        account.balance -= amount;
        let balance = account.balance;

        tables.ledger.push(LedgerEntryEntity::new(
            account_id,
            -signed_amount,
            LedgerCategory::StakeDebit,
            Some(match_id),
            format!("Staked {amount} credits"),
            now,
        ));

        Ok(ReserveOutcome::Granted { balance })
    }

    async fn release_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> StorageResult<ReleaseOutcome> {
        let signed_amount = signed(amount)?;
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        if tables.refunds.contains(&(match_id, account_id)) {
            return Ok(ReleaseOutcome::AlreadyRefunded);
        }

        let Some(account) = tables.accounts.get_mut(&account_id) else {
            return Ok(ReleaseOutcome::UnknownAccount);
        };

        account.balance = credit(account.balance, amount)?;
        let balance = account.balance;

        tables.refunds.insert((match_id, account_id));
        tables.ledger.push(LedgerEntryEntity::new(
            account_id,
            signed_amount,
            LedgerCategory::StakeRefund,
            Some(match_id),
            format!("Refunded {amount} credits"),
            now,
        ));

        Ok(ReleaseOutcome::Refunded { balance })
    }

    async fn start_match(
        &self,
        id: Uuid,
        opponent: ParticipantEntity,
        prompt: MatchPromptEntity,
        started_at: SystemTime,
        deadline_at: SystemTime,
    ) -> StorageResult<Option<MatchEntity>> {
        let mut guard = self.tables.lock().await;
        let Some(record) = guard.matches.get_mut(&id) else {
            return Ok(None);
        };

        if record.status != MatchStatus::Waiting || record.participants.len() != 1 {
            return Ok(None);
        }
        if record.creator() == Some(opponent.account_id) {
            return Ok(None);
        }

        record.participants.push(opponent);
        record.prompt = Some(prompt);
        record.started_at = Some(started_at);
        record.deadline_at = Some(deadline_at);
        record.status = MatchStatus::InProgress;

        Ok(Some(record.clone()))
    }

    async fn record_answer(
        &self,
        id: Uuid,
        account_id: Uuid,
        answer: AnswerEntity,
    ) -> StorageResult<AnswerWrite> {
        let mut guard = self.tables.lock().await;
        let Some(record) = guard.matches.get_mut(&id) else {
            return Ok(AnswerWrite::NotFound);
        };

        let status = record.status;
        let Some(seat) = record
            .participants
            .iter_mut()
            .find(|participant| participant.account_id == account_id)
        else {
            return Ok(AnswerWrite::NotParticipant);
        };

        if seat.answer.is_some() {
            return Ok(AnswerWrite::AlreadyAnswered);
        }
        if status != MatchStatus::InProgress {
            return Ok(AnswerWrite::NotActive(status));
        }

        seat.answer = Some(answer);
        Ok(AnswerWrite::Recorded(record.clone()))
    }

    async fn force_timeouts(&self, id: Uuid, now: SystemTime) -> StorageResult<Option<MatchEntity>> {
        let mut guard = self.tables.lock().await;
        let Some(record) = guard.matches.get_mut(&id) else {
            return Ok(None);
        };

        if record.status == MatchStatus::InProgress {
            let duration_ms = record.policy.duration_ms;
            for seat in record
                .participants
                .iter_mut()
                .filter(|participant| participant.answer.is_none())
            {
                seat.answer = Some(AnswerEntity::timeout(duration_ms, now));
            }
        }

        Ok(Some(record.clone()))
    }

    async fn transition_match(
        &self,
        id: Uuid,
        transition: Transition,
        now: SystemTime,
    ) -> StorageResult<bool> {
        let mut guard = self.tables.lock().await;
        let Some(record) = guard.matches.get_mut(&id) else {
            return Ok(false);
        };

        if record.status != transition.from {
            return Ok(false);
        }

        record.status = transition.to;
        match transition.to {
            MatchStatus::Settling => record.settling_since = Some(now),
            MatchStatus::InProgress => record.settling_since = None,
            MatchStatus::Cancelled | MatchStatus::Completed => record.completed_at = Some(now),
            MatchStatus::Waiting => {}
        }

        Ok(true)
    }

    async fn commit_settlement(&self, commit: SettlementCommit) -> StorageResult<bool> {
        if let Some(err) = self.injected_settlement_failure() {
            return Err(err);
        }

        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        match tables.matches.get(&commit.match_id) {
            Some(record) if record.status == MatchStatus::Settling => {}
            _ => return Ok(false),
        }

        // Stage every account change so a failed check leaves the tables untouched.
        let mut staged: HashMap<Uuid, AccountEntity> = HashMap::new();
        let mut entries = Vec::with_capacity(commit.credits.len());
        let mut refund_keys = Vec::new();

        for entry in &commit.credits {
            if let Some(key) = entry.refund_key() {
                if tables.refunds.contains(&key) || refund_keys.contains(&key) {
                    continue;
                }
                refund_keys.push(key);
            }

            let account = stage(&mut staged, &tables.accounts, entry.account_id)?;
            let amount = u64::try_from(entry.amount).map_err(|_| {
                StorageError::corrupted(format!(
                    "settlement credit for `{}` is negative",
                    entry.account_id
                ))
            })?;
            account.balance = credit(account.balance, amount)?;
            entries.push(entry.clone());
        }

        for delta in &commit.stats {
            stage(&mut staged, &tables.accounts, delta.account_id)?.apply_stats(delta);
        }

        tables.accounts.extend(staged);
        tables.ledger.extend(entries);
        tables.refunds.extend(refund_keys);

        if let Some(record) = tables.matches.get_mut(&commit.match_id) {
            record.status = MatchStatus::Completed;
            record.outcome = Some(commit.outcome);
            record.payout = commit.payout;
            record.house_take = commit.house_take;
            record.completed_at = Some(commit.completed_at);
            record.settling_since = None;
        }

        Ok(true)
    }

    async fn record_match_analytics(&self, analytics: MatchAnalyticsEntity) -> StorageResult<()> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        if tables.analytics.contains_key(&analytics.match_id) {
            return Ok(());
        }

        if let Some(prompt) = tables.prompts.get_mut(&analytics.prompt_id) {
            prompt.times_played += 1;
            prompt.times_correct += analytics.correct_answers;
        }
        tables.analytics.insert(analytics.match_id, analytics);

        Ok(())
    }

    async fn random_active_prompt(&self) -> StorageResult<Option<PromptEntity>> {
        let guard = self.tables.lock().await;
        let active: Vec<&PromptEntity> = guard.prompts.values().filter(|p| p.active).collect();
        if active.is_empty() {
            return Ok(None);
        }

        let index = rand::rng().random_range(0..active.len());
        Ok(active.get(index).map(|prompt| (*prompt).clone()))
    }
}

/// Copy-on-write access to an account inside a staged settlement.
fn stage<'a>(
    staged: &'a mut HashMap<Uuid, AccountEntity>,
    accounts: &HashMap<Uuid, AccountEntity>,
    account_id: Uuid,
) -> StorageResult<&'a mut AccountEntity> {
    if !staged.contains_key(&account_id) {
        let account = accounts.get(&account_id).cloned().ok_or_else(|| {
            StorageError::corrupted(format!("settlement references unknown account `{account_id}`"))
        })?;
        staged.insert(account_id, account);
    }

    staged.get_mut(&account_id).ok_or_else(|| {
        StorageError::corrupted(format!("staged account `{account_id}` vanished"))
    })
}

fn signed(amount: u64) -> StorageResult<i64> {
    i64::try_from(amount)
        .map_err(|_| StorageError::corrupted(format!("amount {amount} exceeds ledger range")))
}

fn credit(balance: u64, amount: u64) -> StorageResult<u64> {
    balance
        .checked_add(amount)
        .ok_or_else(|| StorageError::corrupted(format!("balance overflow adding {amount}")))
}

impl LedgerStore for MemoryLedgerStore {
    fn insert_account(
        &self,
        account: AccountEntity,
        opening: Option<LedgerEntryEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut guard = store.tables.lock().await;
            guard.accounts.insert(account.id, account);
            guard.ledger.extend(opening);
            Ok(())
        })
    }

    fn find_account(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<AccountEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.tables.lock().await.accounts.get(&id).cloned()) })
    }

    fn list_ledger(
        &self,
        account_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<LedgerEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let guard = store.tables.lock().await;
            Ok(guard
                .ledger
                .iter()
                .rev()
                .filter(|entry| entry.account_id == account_id)
                .cloned()
                .collect())
        })
    }

    fn grant_free_credits(
        &self,
        account_id: Uuid,
        amount: u64,
        interval: Duration,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<GrantOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .grant_free_credits(account_id, amount, interval, now)
                .await
        })
    }

    fn reserve_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ReserveOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.reserve_stake(account_id, amount, match_id, now).await })
    }

    fn release_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ReleaseOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.release_stake(account_id, amount, match_id, now).await })
    }

    fn insert_match(&self, record: MatchEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.tables.lock().await.matches.insert(record.id, record);
            match store.injected_lost_ack() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.tables.lock().await.matches.get(&id).cloned()) })
    }

    fn list_matches(
        &self,
        status: MatchStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let guard = store.tables.lock().await;
            let mut matches: Vec<MatchEntity> = guard
                .matches
                .values()
                .filter(|record| record.status == status)
                .cloned()
                .collect();
            matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(matches)
        })
    }

    fn start_match(
        &self,
        id: Uuid,
        opponent: ParticipantEntity,
        prompt: MatchPromptEntity,
        started_at: SystemTime,
        deadline_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let started = store
                .start_match(id, opponent, prompt, started_at, deadline_at)
                .await?;
            match store.injected_lost_ack() {
                Some(err) => Err(err),
                None => Ok(started),
            }
        })
    }

    fn record_answer(
        &self,
        id: Uuid,
        account_id: Uuid,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerWrite>> {
        let store = self.clone();
        Box::pin(async move { store.record_answer(id, account_id, answer).await })
    }

    fn force_timeouts(
        &self,
        id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.force_timeouts(id, now).await })
    }

    fn transition_match(
        &self,
        id: Uuid,
        transition: Transition,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.transition_match(id, transition, now).await })
    }

    fn commit_settlement(
        &self,
        commit: SettlementCommit,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.commit_settlement(commit).await })
    }

    fn insert_prompt(&self, prompt: PromptEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.tables.lock().await.prompts.insert(prompt.id, prompt);
            Ok(())
        })
    }

    fn list_prompts(&self) -> BoxFuture<'static, StorageResult<Vec<PromptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .tables
                .lock()
                .await
                .prompts
                .values()
                .cloned()
                .collect())
        })
    }

    fn set_prompt_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let mut guard = store.tables.lock().await;
            match guard.prompts.get_mut(&id) {
                Some(prompt) => {
                    prompt.active = active;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn random_active_prompt(&self) -> BoxFuture<'static, StorageResult<Option<PromptEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.random_active_prompt().await })
    }

    fn record_match_analytics(
        &self,
        analytics: MatchAnalyticsEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.record_match_analytics(analytics).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{MatchOutcome, MatchPolicy, StatsDelta};
    use crate::state::match_machine::{MatchEvent, plan};

    fn policy() -> MatchPolicy {
        MatchPolicy {
            duration_ms: 30_000,
            rake_percent: 10,
            min_stake: 1,
            max_stake: 10_000,
            waiting_expiry_ms: 600_000,
            refund_on_no_winner: false,
        }
    }

    async fn account(store: &MemoryLedgerStore, balance: u64) -> Uuid {
        let account = AccountEntity::new("player".into(), balance, SystemTime::now());
        let id = account.id;
        store.insert_account(account, None).await.unwrap();
        id
    }

    async fn balance(store: &MemoryLedgerStore, id: Uuid) -> u64 {
        store.find_account(id).await.unwrap().unwrap().balance
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_never_overdraw() {
        let store = MemoryLedgerStore::new();
        let id = account(&store, 250).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .reserve_stake(id, 30, Uuid::new_v4(), SystemTime::now())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReserveOutcome::Granted { .. }) {
                granted += 1;
            }
        }

        assert_eq!(granted, 8);
        assert_eq!(balance(&store, id).await, 10);
        let debits = store.list_ledger(id).await.unwrap();
        assert_eq!(debits.len(), 8);
        assert!(debits.iter().all(|e| e.category == LedgerCategory::StakeDebit));
    }

    #[tokio::test]
    async fn reserve_without_funds_has_no_side_effect() {
        let store = MemoryLedgerStore::new();
        let id = account(&store, 40).await;

        let outcome = store
            .reserve_stake(id, 50, Uuid::new_v4(), SystemTime::now())
            .await
            .unwrap();

        assert_eq!(outcome, ReserveOutcome::Insufficient);
        assert_eq!(balance(&store, id).await, 40);
        assert!(store.list_ledger(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_refunds_once_per_match() {
        let store = MemoryLedgerStore::new();
        let id = account(&store, 0).await;
        let match_id = Uuid::new_v4();

        let first = store
            .release_stake(id, 100, match_id, SystemTime::now())
            .await
            .unwrap();
        let second = store
            .release_stake(id, 100, match_id, SystemTime::now())
            .await
            .unwrap();

        assert_eq!(first, ReleaseOutcome::Refunded { balance: 100 });
        assert_eq!(second, ReleaseOutcome::AlreadyRefunded);
        assert_eq!(balance(&store, id).await, 100);
    }

    #[tokio::test]
    async fn free_credits_respect_the_interval() {
        let store = MemoryLedgerStore::new();
        let id = account(&store, 0).await;
        let interval = Duration::from_secs(24 * 3600);
        let now = SystemTime::now();

        let first = store.grant_free_credits(id, 250, interval, now).await.unwrap();
        let early = store
            .grant_free_credits(id, 250, interval, now + Duration::from_secs(60))
            .await
            .unwrap();
        let later = store
            .grant_free_credits(id, 250, interval, now + interval)
            .await
            .unwrap();

        assert_eq!(first, GrantOutcome::Granted { balance: 250 });
        assert_eq!(
            early,
            GrantOutcome::TooEarly {
                next_claim_at: now + interval
            }
        );
        assert_eq!(later, GrantOutcome::Granted { balance: 500 });
    }

    #[tokio::test]
    async fn second_answer_from_same_seat_is_rejected() {
        let store = MemoryLedgerStore::new();
        let now = SystemTime::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let record = MatchEntity::open(Uuid::new_v4(), a, 10, policy(), now);
        let id = record.id;
        store.insert_match(record).await.unwrap();
        let prompt = MatchPromptEntity {
            id: Uuid::new_v4(),
            title: "t".into(),
            artist: "a".into(),
            lyrics_snippet: "s".into(),
            answer: "x".into(),
        };
        store
            .start_match(id, ParticipantEntity::new(b, now), prompt, now, now)
            .await
            .unwrap()
            .unwrap();

        let answer = AnswerEntity {
            text: Some("x".into()),
            submitted_at: now,
            correct: true,
            elapsed_ms: 10,
            timed_out: false,
        };
        let first = store.record_answer(id, a, answer.clone()).await.unwrap();
        let again = store.record_answer(id, a, answer.clone()).await.unwrap();
        let stranger = store
            .record_answer(id, Uuid::new_v4(), answer)
            .await
            .unwrap();

        assert!(matches!(first, AnswerWrite::Recorded(ref m) if !m.all_decided()));
        assert_eq!(again, AnswerWrite::AlreadyAnswered);
        assert_eq!(stranger, AnswerWrite::NotParticipant);
    }

    #[tokio::test]
    async fn commit_requires_settling_status_and_applies_once() {
        let store = MemoryLedgerStore::new();
        let now = SystemTime::now();
        let winner = account(&store, 0).await;
        let loser = account(&store, 0).await;
        let record = MatchEntity::open(Uuid::new_v4(), winner, 100, policy(), now);
        let id = record.id;
        store.insert_match(record).await.unwrap();

        let commit = SettlementCommit {
            match_id: id,
            outcome: MatchOutcome::Winner { account_id: winner },
            payout: 180,
            house_take: 20,
            credits: vec![LedgerEntryEntity::new(
                winner,
                180,
                LedgerCategory::WinCredit,
                Some(id),
                "win".into(),
                now,
            )],
            stats: vec![
                StatsDelta {
                    account_id: winner,
                    won: true,
                    response_ms: Some(3_000),
                    correct_ms: Some(3_000),
                    credits_earned: 180,
                },
                StatsDelta {
                    account_id: loser,
                    won: false,
                    response_ms: Some(7_000),
                    correct_ms: None,
                    credits_earned: 0,
                },
            ],
            completed_at: now,
        };

        // Still waiting: nothing is applied.
        assert!(!store.commit_settlement(commit.clone()).await.unwrap());
        assert_eq!(balance(&store, winner).await, 0);

        let to_progress = plan(MatchStatus::Waiting, MatchEvent::OpponentJoined).unwrap();
        assert!(store.transition_match(id, to_progress, now).await.unwrap());
        let to_settling = plan(MatchStatus::InProgress, MatchEvent::BeginSettlement).unwrap();
        assert!(store.transition_match(id, to_settling, now).await.unwrap());

        assert!(store.commit_settlement(commit.clone()).await.unwrap());
        assert!(!store.commit_settlement(commit).await.unwrap());

        let winner_account = store.find_account(winner).await.unwrap().unwrap();
        assert_eq!(winner_account.balance, 180);
        assert_eq!(winner_account.wins, 1);
        assert_eq!(winner_account.current_streak, 1);
        assert_eq!(winner_account.fastest_correct_ms, Some(3_000));
        let loser_account = store.find_account(loser).await.unwrap().unwrap();
        assert_eq!(loser_account.balance, 0);
        assert_eq!(loser_account.games_played, 1);
        assert_eq!(loser_account.wins, 0);

        let stored = store.find_match(id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Completed);
        assert_eq!(stored.winner_id(), Some(winner));
    }

    #[tokio::test]
    async fn analytics_are_recorded_once_per_match() {
        let store = MemoryLedgerStore::new();
        let prompt = PromptEntity {
            id: Uuid::new_v4(),
            title: "t".into(),
            artist: "a".into(),
            lyrics_snippet: "s".into(),
            answer: "x".into(),
            active: true,
            times_played: 0,
            times_correct: 0,
            created_at: SystemTime::now(),
        };
        let prompt_id = prompt.id;
        store.insert_prompt(prompt).await.unwrap();

        let analytics = MatchAnalyticsEntity {
            match_id: Uuid::new_v4(),
            prompt_id,
            total_players: 2,
            average_response_ms: Some(5_000),
            completion_rate: 100.0,
            correct_answers: 1,
            created_at: SystemTime::now(),
        };
        store
            .record_match_analytics(analytics.clone())
            .await
            .unwrap();
        store.record_match_analytics(analytics).await.unwrap();

        let prompts = store.list_prompts().await.unwrap();
        assert_eq!(prompts[0].times_played, 1);
        assert_eq!(prompts[0].times_correct, 1);
    }

    #[tokio::test]
    async fn random_prompt_skips_inactive_entries() {
        let store = MemoryLedgerStore::new();
        assert!(store.random_active_prompt().await.unwrap().is_none());

        let mut prompt = PromptEntity {
            id: Uuid::new_v4(),
            title: "t".into(),
            artist: "a".into(),
            lyrics_snippet: "s".into(),
            answer: "x".into(),
            active: false,
            times_played: 0,
            times_correct: 0,
            created_at: SystemTime::now(),
        };
        store.insert_prompt(prompt.clone()).await.unwrap();
        assert!(store.random_active_prompt().await.unwrap().is_none());

        prompt.id = Uuid::new_v4();
        prompt.active = true;
        store.insert_prompt(prompt.clone()).await.unwrap();
        assert_eq!(
            store.random_active_prompt().await.unwrap().map(|p| p.id),
            Some(prompt.id)
        );
    }
}
