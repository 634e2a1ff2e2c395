use mongodb::bson::{Bson, DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{
        AccountEntity, AnswerEntity, LedgerCategory, LedgerEntryEntity, MatchAnalyticsEntity,
        MatchEntity, MatchOutcome, MatchPolicy, MatchPromptEntity, ParticipantEntity,
        PromptEntity,
    },
    state::match_machine::MatchStatus,
};

pub const ACCOUNT_COLLECTION_NAME: &str = "accounts";
pub const LEDGER_COLLECTION_NAME: &str = "ledger";
pub const REFUND_COLLECTION_NAME: &str = "refunds";
pub const MATCH_COLLECTION_NAME: &str = "matches";
pub const PROMPT_COLLECTION_NAME: &str = "prompts";
pub const ANALYTICS_COLLECTION_NAME: &str = "match_analytics";

/// Helper that turns stored primitives back into entity fields, reporting the offending
/// document on failure.
struct Decoder {
    collection: &'static str,
    id: String,
}

impl Decoder {
    fn new(collection: &'static str, id: &str) -> Self {
        Self {
            collection,
            id: id.to_owned(),
        }
    }

    fn corrupt(&self, reason: String) -> MongoDaoError {
        MongoDaoError::Corrupt {
            collection: self.collection,
            id: self.id.clone(),
            reason,
        }
    }

    fn uuid(&self, raw: &str) -> MongoResult<Uuid> {
        Uuid::parse_str(raw).map_err(|err| self.corrupt(format!("invalid uuid `{raw}`: {err}")))
    }

    fn unsigned(&self, field: &str, value: i64) -> MongoResult<u64> {
        u64::try_from(value).map_err(|_| self.corrupt(format!("`{field}` is negative ({value})")))
    }

    fn counter(&self, field: &str, value: i64) -> MongoResult<u32> {
        u32::try_from(value).map_err(|_| self.corrupt(format!("`{field}` out of range ({value})")))
    }
}

/// Store an unsigned counter in a BSON int64.
pub fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Convert a credit amount for a balance update, refusing values a BSON int64 cannot hold.
pub fn amount(value: u64) -> MongoResult<i64> {
    i64::try_from(value).map_err(|_| MongoDaoError::AmountOutOfRange { amount: value })
}

pub fn key(id: Uuid) -> String {
    id.to_string()
}

pub fn doc_id(id: Uuid) -> Document {
    doc! { "_id": key(id) }
}

pub fn refund_doc_id(match_id: Uuid, account_id: Uuid) -> Document {
    doc! { "_id": format!("{match_id}:{account_id}") }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAccountDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub balance: i64,
    pub games_played: i64,
    pub wins: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub fastest_correct_ms: Option<i64>,
    pub total_response_ms: i64,
    pub answered_count: i64,
    pub total_credits_earned: i64,
    pub last_free_claim_at: Option<DateTime>,
    pub created_at: DateTime,
}

impl MongoAccountDocument {
    /// Statistics fields written back by a settlement; the balance is moved separately.
    pub fn stats_update(&self) -> Document {
        doc! {
            "$set": {
                "games_played": self.games_played,
                "wins": self.wins,
                "current_streak": self.current_streak,
                "longest_streak": self.longest_streak,
                "fastest_correct_ms": self.fastest_correct_ms,
                "total_response_ms": self.total_response_ms,
                "answered_count": self.answered_count,
                "total_credits_earned": self.total_credits_earned,
            }
        }
    }
}

impl From<AccountEntity> for MongoAccountDocument {
    fn from(value: AccountEntity) -> Self {
        Self {
            id: key(value.id),
            username: value.username,
            balance: signed(value.balance),
            games_played: i64::from(value.games_played),
            wins: i64::from(value.wins),
            current_streak: i64::from(value.current_streak),
            longest_streak: i64::from(value.longest_streak),
            fastest_correct_ms: value.fastest_correct_ms.map(signed),
            total_response_ms: signed(value.total_response_ms),
            answered_count: i64::from(value.answered_count),
            total_credits_earned: signed(value.total_credits_earned),
            last_free_claim_at: value.last_free_claim_at.map(DateTime::from_system_time),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoAccountDocument> for AccountEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAccountDocument) -> MongoResult<Self> {
        let d = Decoder::new(ACCOUNT_COLLECTION_NAME, &value.id);
        Ok(Self {
            id: d.uuid(&value.id)?,
            username: value.username,
            balance: d.unsigned("balance", value.balance)?,
            games_played: d.counter("games_played", value.games_played)?,
            wins: d.counter("wins", value.wins)?,
            current_streak: d.counter("current_streak", value.current_streak)?,
            longest_streak: d.counter("longest_streak", value.longest_streak)?,
            fastest_correct_ms: value
                .fastest_correct_ms
                .map(|ms| d.unsigned("fastest_correct_ms", ms))
                .transpose()?,
            total_response_ms: d.unsigned("total_response_ms", value.total_response_ms)?,
            answered_count: d.counter("answered_count", value.answered_count)?,
            total_credits_earned: d.unsigned("total_credits_earned", value.total_credits_earned)?,
            last_free_claim_at: value.last_free_claim_at.map(DateTime::to_system_time),
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoLedgerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub account_id: String,
    pub amount: i64,
    pub category: String,
    pub match_id: Option<String>,
    pub description: String,
    pub created_at: DateTime,
}

impl From<&LedgerEntryEntity> for MongoLedgerDocument {
    fn from(value: &LedgerEntryEntity) -> Self {
        Self {
            id: key(value.id),
            account_id: key(value.account_id),
            amount: value.amount,
            category: value.category.as_str().to_owned(),
            match_id: value.match_id.map(key),
            description: value.description.clone(),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoLedgerDocument> for LedgerEntryEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoLedgerDocument) -> MongoResult<Self> {
        let d = Decoder::new(LEDGER_COLLECTION_NAME, &value.id);
        let category = LedgerCategory::parse(&value.category)
            .ok_or_else(|| d.corrupt(format!("unknown category `{}`", value.category)))?;
        Ok(Self {
            id: d.uuid(&value.id)?,
            account_id: d.uuid(&value.account_id)?,
            amount: value.amount,
            category,
            match_id: value.match_id.as_deref().map(|raw| d.uuid(raw)).transpose()?,
            description: value.description,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPolicyDocument {
    pub duration_ms: i64,
    pub rake_percent: i32,
    pub min_stake: i64,
    pub max_stake: i64,
    pub waiting_expiry_ms: i64,
    pub refund_on_no_winner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMatchPromptDocument {
    pub prompt_id: String,
    pub title: String,
    pub artist: String,
    pub lyrics_snippet: String,
    pub answer: String,
}

impl MongoMatchPromptDocument {
    pub fn to_document(&self) -> Document {
        doc! {
            "prompt_id": self.prompt_id.clone(),
            "title": self.title.clone(),
            "artist": self.artist.clone(),
            "lyrics_snippet": self.lyrics_snippet.clone(),
            "answer": self.answer.clone(),
        }
    }
}

impl From<MatchPromptEntity> for MongoMatchPromptDocument {
    fn from(value: MatchPromptEntity) -> Self {
        Self {
            prompt_id: key(value.id),
            title: value.title,
            artist: value.artist,
            lyrics_snippet: value.lyrics_snippet,
            answer: value.answer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    pub text: Option<String>,
    pub submitted_at: DateTime,
    pub correct: bool,
    pub elapsed_ms: i64,
    pub timed_out: bool,
}

impl MongoAnswerDocument {
    pub fn to_document(&self) -> Document {
        doc! {
            "text": self.text.clone(),
            "submitted_at": self.submitted_at,
            "correct": self.correct,
            "elapsed_ms": self.elapsed_ms,
            "timed_out": self.timed_out,
        }
    }
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            text: value.text,
            submitted_at: DateTime::from_system_time(value.submitted_at),
            correct: value.correct,
            elapsed_ms: signed(value.elapsed_ms),
            timed_out: value.timed_out,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    pub account_id: String,
    pub joined_at: DateTime,
    pub answer: Option<MongoAnswerDocument>,
}

impl MongoParticipantDocument {
    pub fn to_document(&self) -> Document {
        let answer = self
            .answer
            .as_ref()
            .map_or(Bson::Null, |answer| Bson::Document(answer.to_document()));
        doc! {
            "account_id": self.account_id.clone(),
            "joined_at": self.joined_at,
            "answer": answer,
        }
    }
}

impl From<ParticipantEntity> for MongoParticipantDocument {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            account_id: key(value.account_id),
            joined_at: DateTime::from_system_time(value.joined_at),
            answer: value.answer.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoOutcomeDocument {
    pub kind: String,
    pub account_id: Option<String>,
}

impl MongoOutcomeDocument {
    pub fn to_document(&self) -> Document {
        doc! { "kind": self.kind.clone(), "account_id": self.account_id.clone() }
    }
}

impl From<MatchOutcome> for MongoOutcomeDocument {
    fn from(value: MatchOutcome) -> Self {
        match value {
            MatchOutcome::Winner { account_id } => Self {
                kind: "winner".into(),
                account_id: Some(key(account_id)),
            },
            MatchOutcome::Push => Self {
                kind: "push".into(),
                account_id: None,
            },
            MatchOutcome::NoWinner => Self {
                kind: "no_winner".into(),
                account_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMatchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub stake: i64,
    pub status: String,
    pub policy: MongoPolicyDocument,
    pub prompt: Option<MongoMatchPromptDocument>,
    pub participants: Vec<MongoParticipantDocument>,
    pub created_at: DateTime,
    pub started_at: Option<DateTime>,
    pub deadline_at: Option<DateTime>,
    pub settling_since: Option<DateTime>,
    pub completed_at: Option<DateTime>,
    pub outcome: Option<MongoOutcomeDocument>,
    pub payout: i64,
    pub house_take: i64,
}

impl From<MatchEntity> for MongoMatchDocument {
    fn from(value: MatchEntity) -> Self {
        Self {
            id: key(value.id),
            stake: signed(value.stake),
            status: value.status.as_str().to_owned(),
            policy: MongoPolicyDocument {
                duration_ms: signed(value.policy.duration_ms),
                rake_percent: i32::from(value.policy.rake_percent),
                min_stake: signed(value.policy.min_stake),
                max_stake: signed(value.policy.max_stake),
                waiting_expiry_ms: signed(value.policy.waiting_expiry_ms),
                refund_on_no_winner: value.policy.refund_on_no_winner,
            },
            prompt: value.prompt.map(Into::into),
            participants: value.participants.into_iter().map(Into::into).collect(),
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            deadline_at: value.deadline_at.map(DateTime::from_system_time),
            settling_since: value.settling_since.map(DateTime::from_system_time),
            completed_at: value.completed_at.map(DateTime::from_system_time),
            outcome: value.outcome.map(Into::into),
            payout: signed(value.payout),
            house_take: signed(value.house_take),
        }
    }
}

impl TryFrom<MongoMatchDocument> for MatchEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoMatchDocument) -> MongoResult<Self> {
        let d = Decoder::new(MATCH_COLLECTION_NAME, &value.id);
        let status = MatchStatus::parse(&value.status)
            .ok_or_else(|| d.corrupt(format!("unknown status `{}`", value.status)))?;

        let policy = MatchPolicy {
            duration_ms: d.unsigned("policy.duration_ms", value.policy.duration_ms)?,
            rake_percent: u8::try_from(value.policy.rake_percent)
                .ok()
                .filter(|rake| *rake <= 100)
                .ok_or_else(|| {
                    d.corrupt(format!("rake {} out of range", value.policy.rake_percent))
                })?,
            min_stake: d.unsigned("policy.min_stake", value.policy.min_stake)?,
            max_stake: d.unsigned("policy.max_stake", value.policy.max_stake)?,
            waiting_expiry_ms: d.unsigned("policy.waiting_expiry_ms", value.policy.waiting_expiry_ms)?,
            refund_on_no_winner: value.policy.refund_on_no_winner,
        };

        let prompt = value
            .prompt
            .map(|prompt| {
                Ok::<_, MongoDaoError>(MatchPromptEntity {
                    id: d.uuid(&prompt.prompt_id)?,
                    title: prompt.title,
                    artist: prompt.artist,
                    lyrics_snippet: prompt.lyrics_snippet,
                    answer: prompt.answer,
                })
            })
            .transpose()?;

        let participants = value
            .participants
            .into_iter()
            .map(|participant| {
                let answer = participant
                    .answer
                    .map(|answer| {
                        Ok::<_, MongoDaoError>(AnswerEntity {
                            text: answer.text,
                            submitted_at: answer.submitted_at.to_system_time(),
                            correct: answer.correct,
                            elapsed_ms: d.unsigned("elapsed_ms", answer.elapsed_ms)?,
                            timed_out: answer.timed_out,
                        })
                    })
                    .transpose()?;
                Ok(ParticipantEntity {
                    account_id: d.uuid(&participant.account_id)?,
                    joined_at: participant.joined_at.to_system_time(),
                    answer,
                })
            })
            .collect::<MongoResult<Vec<_>>>()?;

        let outcome = value
            .outcome
            .map(|outcome| match (outcome.kind.as_str(), outcome.account_id) {
                ("winner", Some(raw)) => Ok(MatchOutcome::Winner {
                    account_id: d.uuid(&raw)?,
                }),
                ("push", _) => Ok(MatchOutcome::Push),
                ("no_winner", _) => Ok(MatchOutcome::NoWinner),
                (kind, _) => Err(d.corrupt(format!("unknown outcome `{kind}`"))),
            })
            .transpose()?;

        Ok(Self {
            id: d.uuid(&value.id)?,
            stake: d.unsigned("stake", value.stake)?,
            status,
            policy,
            prompt,
            participants,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            deadline_at: value.deadline_at.map(DateTime::to_system_time),
            settling_since: value.settling_since.map(DateTime::to_system_time),
            completed_at: value.completed_at.map(DateTime::to_system_time),
            outcome,
            payout: d.unsigned("payout", value.payout)?,
            house_take: d.unsigned("house_take", value.house_take)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPromptDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub artist: String,
    pub lyrics_snippet: String,
    pub answer: String,
    pub active: bool,
    pub times_played: i64,
    pub times_correct: i64,
    pub created_at: DateTime,
}

impl From<PromptEntity> for MongoPromptDocument {
    fn from(value: PromptEntity) -> Self {
        Self {
            id: key(value.id),
            title: value.title,
            artist: value.artist,
            lyrics_snippet: value.lyrics_snippet,
            answer: value.answer,
            active: value.active,
            times_played: i64::from(value.times_played),
            times_correct: i64::from(value.times_correct),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoPromptDocument> for PromptEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoPromptDocument) -> MongoResult<Self> {
        let d = Decoder::new(PROMPT_COLLECTION_NAME, &value.id);
        Ok(Self {
            id: d.uuid(&value.id)?,
            title: value.title,
            artist: value.artist,
            lyrics_snippet: value.lyrics_snippet,
            answer: value.answer,
            active: value.active,
            times_played: d.counter("times_played", value.times_played)?,
            times_correct: d.counter("times_correct", value.times_correct)?,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnalyticsDocument {
    #[serde(rename = "_id")]
    pub match_id: String,
    pub prompt_id: String,
    pub total_players: i64,
    pub average_response_ms: Option<i64>,
    pub completion_rate: f64,
    pub correct_answers: i64,
    pub created_at: DateTime,
}

impl From<MatchAnalyticsEntity> for MongoAnalyticsDocument {
    fn from(value: MatchAnalyticsEntity) -> Self {
        Self {
            match_id: key(value.match_id),
            prompt_id: key(value.prompt_id),
            total_players: i64::from(value.total_players),
            average_response_ms: value.average_response_ms.map(signed),
            completion_rate: f64::from(value.completion_rate),
            correct_answers: i64::from(value.correct_answers),
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn sample_match() -> MatchEntity {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let policy = MatchPolicy {
            duration_ms: 30_000,
            rake_percent: 10,
            min_stake: 50,
            max_stake: 10_000,
            waiting_expiry_ms: 600_000,
            refund_on_no_winner: false,
        };
        let mut record = MatchEntity::open(Uuid::new_v4(), Uuid::new_v4(), 100, policy, now);
        record.participants.push(ParticipantEntity {
            account_id: Uuid::new_v4(),
            joined_at: now,
            answer: Some(AnswerEntity::timeout(30_000, now)),
        });
        record.prompt = Some(MatchPromptEntity {
            id: Uuid::new_v4(),
            title: "Title".into(),
            artist: "Artist".into(),
            lyrics_snippet: "You are my ___".into(),
            answer: "sunshine".into(),
        });
        record.status = MatchStatus::Completed;
        record.outcome = Some(MatchOutcome::NoWinner);
        record.house_take = 200;
        record
    }

    #[test]
    fn match_document_keeps_every_field() {
        let record = sample_match();
        let document: MongoMatchDocument = record.clone().into();
        let back = MatchEntity::try_from(document).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn negative_balance_is_reported_as_corruption() {
        let mut document: MongoAccountDocument =
            AccountEntity::new("ada".into(), 10, SystemTime::UNIX_EPOCH).into();
        document.balance = -5;

        let err = AccountEntity::try_from(document).unwrap_err();
        assert!(matches!(err, MongoDaoError::Corrupt { collection, .. } if collection == ACCOUNT_COLLECTION_NAME));
    }

    #[test]
    fn amounts_beyond_int64_are_refused() {
        assert_eq!(amount(250).unwrap(), 250);
        assert_eq!(amount(i64::MAX as u64).unwrap(), i64::MAX);
        assert!(matches!(
            amount(u64::MAX),
            Err(MongoDaoError::AmountOutOfRange { amount }) if amount == u64::MAX
        ));
    }

    #[test]
    fn unknown_status_is_reported_as_corruption() {
        let mut document: MongoMatchDocument = sample_match().into();
        document.status = "paused".into();

        assert!(matches!(
            MatchEntity::try_from(document),
            Err(MongoDaoError::Corrupt { .. })
        ));
    }
}
