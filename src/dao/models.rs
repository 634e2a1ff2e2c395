use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::state::match_machine::MatchStatus;

/// Player account: spendable balance plus cumulative statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountEntity {
    /// Stable identifier for the account.
    pub id: Uuid,
    /// Display name chosen at sign-up.
    pub username: String,
    /// Spendable credits; never negative.
    pub balance: u64,
    /// Settled matches this account took part in.
    pub games_played: u32,
    /// Settled matches this account won.
    pub wins: u32,
    /// Consecutive wins up to the latest settled match.
    pub current_streak: u32,
    /// Best value ever reached by `current_streak`.
    pub longest_streak: u32,
    /// Fastest correct answer, in milliseconds.
    pub fastest_correct_ms: Option<u64>,
    /// Sum of response times of submitted (non timed-out) answers.
    pub total_response_ms: u64,
    /// Number of submitted (non timed-out) answers.
    pub answered_count: u32,
    /// Sum of all win credits received.
    pub total_credits_earned: u64,
    /// Last time free credits were claimed.
    pub last_free_claim_at: Option<SystemTime>,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

impl AccountEntity {
    /// Build a brand-new account holding `balance` credits.
    pub fn new(username: String, balance: u64, created_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            balance,
            games_played: 0,
            wins: 0,
            current_streak: 0,
            longest_streak: 0,
            fastest_correct_ms: None,
            total_response_ms: 0,
            answered_count: 0,
            total_credits_earned: 0,
            last_free_claim_at: None,
            created_at,
        }
    }

    /// Apply the statistics of one settled match.
    pub fn apply_stats(&mut self, delta: &StatsDelta) {
        self.games_played += 1;
        if delta.won {
            self.wins += 1;
            self.current_streak += 1;
            self.longest_streak = self.longest_streak.max(self.current_streak);
        } else {
            self.current_streak = 0;
        }
        if let Some(response_ms) = delta.response_ms {
            self.total_response_ms += response_ms;
            self.answered_count += 1;
        }
        if let Some(correct_ms) = delta.correct_ms {
            self.fastest_correct_ms = Some(
                self.fastest_correct_ms
                    .map_or(correct_ms, |best| best.min(correct_ms)),
            );
        }
        self.total_credits_earned += delta.credits_earned;
    }
}

/// Kind of movement recorded in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCategory {
    /// Stake escrowed when creating or joining a match.
    StakeDebit,
    /// Stake given back (cancelled match, push, or no-winner refund policy).
    StakeRefund,
    /// Pot minus rake credited to a winner.
    WinCredit,
    /// Sign-up bonus or periodic free credits.
    FreeGrant,
    /// Credits bought through the store (recorded by external flows).
    Purchase,
}

impl LedgerCategory {
    /// Stable storage representation of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerCategory::StakeDebit => "stake_debit",
            LedgerCategory::StakeRefund => "stake_refund",
            LedgerCategory::WinCredit => "win_credit",
            LedgerCategory::FreeGrant => "free_grant",
            LedgerCategory::Purchase => "purchase",
        }
    }

    /// Parse the storage representation produced by [`LedgerCategory::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stake_debit" => Some(LedgerCategory::StakeDebit),
            "stake_refund" => Some(LedgerCategory::StakeRefund),
            "win_credit" => Some(LedgerCategory::WinCredit),
            "free_grant" => Some(LedgerCategory::FreeGrant),
            "purchase" => Some(LedgerCategory::Purchase),
            _ => None,
        }
    }
}

/// Append-only ledger record. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntryEntity {
    /// Identifier of the entry.
    pub id: Uuid,
    /// Account whose balance moved.
    pub account_id: Uuid,
    /// Signed amount: negative for debits, positive for credits.
    pub amount: i64,
    /// Kind of movement.
    pub category: LedgerCategory,
    /// Match this movement belongs to, if any.
    pub match_id: Option<Uuid>,
    /// Human readable description.
    pub description: String,
    /// Time the movement was committed.
    pub created_at: SystemTime,
}

impl LedgerEntryEntity {
    /// Build a new entry with a fresh identifier.
    pub fn new(
        account_id: Uuid,
        amount: i64,
        category: LedgerCategory,
        match_id: Option<Uuid>,
        description: String,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            category,
            match_id,
            description,
            created_at,
        }
    }

    /// Uniqueness key guarding refunds: one refund per (match, account).
    pub fn refund_key(&self) -> Option<(Uuid, Uuid)> {
        match (self.category, self.match_id) {
            (LedgerCategory::StakeRefund, Some(match_id)) => Some((match_id, self.account_id)),
            _ => None,
        }
    }
}

/// Policy values frozen onto a match when it is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Length of the answer window, in milliseconds.
    pub duration_ms: u64,
    /// Platform fee taken from the pot, in percent (0–100).
    pub rake_percent: u8,
    /// Smallest accepted stake.
    pub min_stake: u64,
    /// Largest accepted stake.
    pub max_stake: u64,
    /// How long a match may wait for an opponent before being cancelled.
    pub waiting_expiry_ms: u64,
    /// Refund both stakes when nobody answered correctly instead of keeping them.
    pub refund_on_no_winner: bool,
}

impl MatchPolicy {
    /// Answer window as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Waiting window as a [`Duration`].
    pub fn waiting_expiry(&self) -> Duration {
        Duration::from_millis(self.waiting_expiry_ms)
    }
}

/// Prompt snapshot copied onto a match when it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchPromptEntity {
    /// Identifier of the catalog prompt.
    pub id: Uuid,
    /// Song title.
    pub title: String,
    /// Song artist.
    pub artist: String,
    /// Lyrics excerpt with the missing part blanked out.
    pub lyrics_snippet: String,
    /// Accepted answer.
    pub answer: String,
}

impl From<PromptEntity> for MatchPromptEntity {
    fn from(value: PromptEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            artist: value.artist,
            lyrics_snippet: value.lyrics_snippet,
            answer: value.answer,
        }
    }
}

/// Recorded answer of a participant. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Submitted text; `None` when the slot was closed by the clock.
    pub text: Option<String>,
    /// Time the answer (or timeout) was recorded.
    pub submitted_at: SystemTime,
    /// Whether the text matched the accepted answer.
    pub correct: bool,
    /// Milliseconds between the match start and the submission.
    pub elapsed_ms: u64,
    /// Whether the slot was closed by the deadline rather than by the player.
    pub timed_out: bool,
}

impl AnswerEntity {
    /// Synthesized non-answer used when the deadline closes an open slot.
    pub fn timeout(duration_ms: u64, at: SystemTime) -> Self {
        Self {
            text: None,
            submitted_at: at,
            correct: false,
            elapsed_ms: duration_ms,
            timed_out: true,
        }
    }
}

/// One of the two seats of a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Account holding the seat.
    pub account_id: Uuid,
    /// Time the stake was escrowed.
    pub joined_at: SystemTime,
    /// Answer, once submitted or timed out.
    pub answer: Option<AnswerEntity>,
}

impl ParticipantEntity {
    /// Seat for an account that has not answered yet.
    pub fn new(account_id: Uuid, joined_at: SystemTime) -> Self {
        Self {
            account_id,
            joined_at,
            answer: None,
        }
    }

    /// Whether the slot is decided (answered or timed out).
    pub fn is_decided(&self) -> bool {
        self.answer.is_some()
    }
}

/// Result of judging a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// A single participant won the pot.
    Winner {
        /// Account credited with the payout.
        account_id: Uuid,
    },
    /// Both correct with identical elapsed time; both stakes refunded.
    Push,
    /// Nobody answered correctly.
    NoWinner,
}

impl MatchOutcome {
    /// Winning account, if any.
    pub fn winner(&self) -> Option<Uuid> {
        match self {
            MatchOutcome::Winner { account_id } => Some(*account_id),
            _ => None,
        }
    }
}

/// Two-player contest. Exactly one participant while waiting, two afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchEntity {
    /// Primary key of the match.
    pub id: Uuid,
    /// Stake escrowed by each participant; immutable.
    pub stake: u64,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Policy snapshot taken at creation.
    pub policy: MatchPolicy,
    /// Prompt assigned when the opponent joined.
    pub prompt: Option<MatchPromptEntity>,
    /// Creator first, opponent second.
    pub participants: Vec<ParticipantEntity>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Start of the answer window.
    pub started_at: Option<SystemTime>,
    /// End of the answer window.
    pub deadline_at: Option<SystemTime>,
    /// Time the current settlement lease was taken.
    pub settling_since: Option<SystemTime>,
    /// Time the match reached a terminal status.
    pub completed_at: Option<SystemTime>,
    /// Judged outcome, set once on completion.
    pub outcome: Option<MatchOutcome>,
    /// Credits paid to the winner.
    pub payout: u64,
    /// Credits kept by the platform (rake, or forfeited stakes).
    pub house_take: u64,
}

impl MatchEntity {
    /// Open a new waiting match seated by `creator`.
    pub fn open(
        id: Uuid,
        creator: Uuid,
        stake: u64,
        policy: MatchPolicy,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            stake,
            status: MatchStatus::Waiting,
            policy,
            prompt: None,
            participants: vec![ParticipantEntity::new(creator, created_at)],
            created_at,
            started_at: None,
            deadline_at: None,
            settling_since: None,
            completed_at: None,
            outcome: None,
            payout: 0,
            house_take: 0,
        }
    }

    /// Account that created the match.
    pub fn creator(&self) -> Option<Uuid> {
        self.participants.first().map(|p| p.account_id)
    }

    /// Seat held by `account_id`, if any.
    pub fn participant(&self, account_id: Uuid) -> Option<&ParticipantEntity> {
        self.participants
            .iter()
            .find(|participant| participant.account_id == account_id)
    }

    /// Both seats are filled and both slots are decided.
    pub fn all_decided(&self) -> bool {
        self.participants.len() == 2 && self.participants.iter().all(|p| p.is_decided())
    }

    /// Combined stake of both participants.
    pub fn pot(&self) -> u64 {
        self.stake.saturating_mul(2)
    }

    /// Winner, once completed.
    pub fn winner_id(&self) -> Option<Uuid> {
        self.outcome.and_then(|outcome| outcome.winner())
    }

    /// Instant after which a waiting match is cancelled.
    pub fn waiting_expires_at(&self) -> SystemTime {
        self.created_at + self.policy.waiting_expiry()
    }
}

/// Per-participant statistics produced by a settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsDelta {
    /// Account being updated.
    pub account_id: Uuid,
    /// Whether this account won the match.
    pub won: bool,
    /// Response time of a submitted answer, if the player answered in time.
    pub response_ms: Option<u64>,
    /// Response time of a correct answer.
    pub correct_ms: Option<u64>,
    /// Credits won in this match.
    pub credits_earned: u64,
}

/// Lyric-completion prompt from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptEntity {
    /// Identifier of the prompt.
    pub id: Uuid,
    /// Song title.
    pub title: String,
    /// Song artist.
    pub artist: String,
    /// Lyrics excerpt with the missing part blanked out.
    pub lyrics_snippet: String,
    /// Accepted answer.
    pub answer: String,
    /// Whether the prompt can be drawn for new matches.
    pub active: bool,
    /// Number of settled matches that used the prompt.
    pub times_played: u32,
    /// Number of correct answers received for the prompt.
    pub times_correct: u32,
    /// Creation timestamp.
    pub created_at: SystemTime,
}

/// Advisory per-match analytics written after settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchAnalyticsEntity {
    /// Match the analytics describe; one record per match.
    pub match_id: Uuid,
    /// Prompt played in the match.
    pub prompt_id: Uuid,
    /// Number of participants.
    pub total_players: u32,
    /// Mean response time of answers submitted in time.
    pub average_response_ms: Option<u64>,
    /// Share of participants that answered before the deadline, in percent.
    pub completion_rate: f32,
    /// Number of correct answers.
    pub correct_answers: u32,
    /// Time the record was produced.
    pub created_at: SystemTime,
}
