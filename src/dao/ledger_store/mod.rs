pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    AccountEntity, AnswerEntity, LedgerEntryEntity, MatchAnalyticsEntity, MatchEntity,
    MatchOutcome, MatchPromptEntity, ParticipantEntity, PromptEntity, StatsDelta,
};
use crate::dao::storage::StorageResult;
use crate::state::match_machine::{MatchStatus, Transition};

/// Result of an atomic conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Balance covered the amount; it was debited and a ledger entry appended.
    Granted {
        /// Balance after the debit.
        balance: u64,
    },
    /// Balance too low; nothing changed.
    Insufficient,
    /// No such account.
    UnknownAccount,
}

/// Result of an idempotent refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Amount credited back and a refund entry appended.
    Refunded {
        /// Balance after the credit.
        balance: u64,
    },
    /// A refund for this (match, account) already exists; nothing changed.
    AlreadyRefunded,
    /// No such account.
    UnknownAccount,
}

/// Result of a rate-limited free credit grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Credits granted.
    Granted {
        /// Balance after the grant.
        balance: u64,
    },
    /// The previous claim is too recent.
    TooEarly {
        /// Earliest time the next claim succeeds.
        next_claim_at: SystemTime,
    },
    /// No such account.
    UnknownAccount,
}

/// Result of recording an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerWrite {
    /// Answer stored; carries the match as it was right after the write.
    Recorded(MatchEntity),
    /// The participant already has an answer.
    AlreadyAnswered,
    /// The match is not accepting answers.
    NotActive(MatchStatus),
    /// The account does not hold a seat in the match.
    NotParticipant,
    /// No such match.
    NotFound,
}

/// Everything a settlement writes, applied atomically by [`LedgerStore::commit_settlement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCommit {
    /// Match being closed; must currently be `settling`.
    pub match_id: Uuid,
    /// Judged outcome.
    pub outcome: MatchOutcome,
    /// Credits paid to the winner.
    pub payout: u64,
    /// Credits kept by the platform.
    pub house_take: u64,
    /// Balance credits (win credit or refunds) with their ledger entries.
    pub credits: Vec<LedgerEntryEntity>,
    /// Statistics for both participants.
    pub stats: Vec<StatsDelta>,
    /// Completion timestamp.
    pub completed_at: SystemTime,
}

/// Transactional persistence for accounts, the ledger, matches and prompts.
///
/// Every method is one atomic unit: it either fully applies or leaves no trace, and
/// concurrent calls behave as if run one after the other.
pub trait LedgerStore: Send + Sync {
    /// Insert a new account together with its opening ledger entry.
    fn insert_account(
        &self,
        account: AccountEntity,
        opening: Option<LedgerEntryEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Load an account.
    fn find_account(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<AccountEntity>>>;
    /// Ledger entries of an account, newest first.
    fn list_ledger(&self, account_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<LedgerEntryEntity>>>;
    /// Grant free credits when the last claim is older than `interval`.
    fn grant_free_credits(
        &self,
        account_id: Uuid,
        amount: u64,
        interval: Duration,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<GrantOutcome>>;

    /// Debit `amount` if the balance covers it and append the matching ledger entry.
    fn reserve_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ReserveOutcome>>;
    /// Credit `amount` back unless a refund for (match, account) already exists.
    fn release_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ReleaseOutcome>>;

    /// Insert a freshly opened match.
    fn insert_match(&self, record: MatchEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a match.
    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>>;
    /// Matches currently in `status`, newest first.
    fn list_matches(&self, status: MatchStatus)
    -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>>;
    /// Seat the opponent and open the answer window if the match is still waiting with one seat.
    fn start_match(
        &self,
        id: Uuid,
        opponent: ParticipantEntity,
        prompt: MatchPromptEntity,
        started_at: SystemTime,
        deadline_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>>;
    /// Store the first answer of a participant of an in-progress match.
    fn record_answer(
        &self,
        id: Uuid,
        account_id: Uuid,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerWrite>>;
    /// Close every open slot of an in-progress match with a timeout answer.
    fn force_timeouts(
        &self,
        id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>>;
    /// Compare-and-set the status. Returns whether the store still observed `transition.from`.
    fn transition_match(
        &self,
        id: Uuid,
        transition: Transition,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Apply payout, counters and closure of a `settling` match. Returns `false` when the
    /// match was not in `settling` anymore.
    fn commit_settlement(&self, commit: SettlementCommit)
    -> BoxFuture<'static, StorageResult<bool>>;

    /// Insert a catalog prompt.
    fn insert_prompt(&self, prompt: PromptEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Every catalog prompt.
    fn list_prompts(&self) -> BoxFuture<'static, StorageResult<Vec<PromptEntity>>>;
    /// Toggle whether a prompt can be drawn. Returns `false` for unknown prompts.
    fn set_prompt_active(&self, id: Uuid, active: bool)
    -> BoxFuture<'static, StorageResult<bool>>;
    /// Draw a random active prompt.
    fn random_active_prompt(&self) -> BoxFuture<'static, StorageResult<Option<PromptEntity>>>;

    /// Store match analytics and bump prompt statistics, once per match.
    fn record_match_analytics(
        &self,
        analytics: MatchAnalyticsEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Check that the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
