//! DTOs for the match lobby and match lifecycle endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{MatchEntity, MatchOutcome, ParticipantEntity},
    dto::{format_system_time, validation::validate_not_blank},
    state::match_machine::MatchStatus,
};

/// Payload used to open a match with an escrowed stake.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateMatchRequest {
    #[validate(range(min = 1))]
    pub stake: u64,
}

/// Payload carrying a lyric guess.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(max = 200), custom(function = "validate_not_blank"))]
    pub answer: String,
}

/// Acknowledgement of a recorded answer.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerAck {
    pub match_id: Uuid,
    /// Milliseconds between the start of the window and the submission.
    pub elapsed_ms: u64,
    /// Whether the submission arrived after the deadline and was recorded as a timeout.
    pub timed_out: bool,
    /// Match status right after the submission was processed.
    pub status: MatchStatus,
}

/// Prompt as shown to players; the accepted answer only appears once the match is completed.
#[derive(Debug, Serialize, ToSchema)]
pub struct PromptView {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub lyrics_snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Seat of a match. Answer details stay hidden until completion.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantView {
    pub account_id: Uuid,
    pub joined_at: String,
    pub answered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

impl ParticipantView {
    fn new(participant: ParticipantEntity, reveal: bool) -> Self {
        let answered = participant.is_decided();
        let answer = participant.answer.filter(|_| reveal);
        Self {
            account_id: participant.account_id,
            joined_at: format_system_time(participant.joined_at),
            answered,
            correct: answer.as_ref().map(|answer| answer.correct),
            elapsed_ms: answer.as_ref().map(|answer| answer.elapsed_ms),
            timed_out: answer.as_ref().map(|answer| answer.timed_out),
            answer: answer.and_then(|answer| answer.text),
        }
    }
}

/// Final result of a completed match.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// One player took the pot.
    Winner,
    /// Tie on time; both stakes refunded.
    Push,
    /// Nobody answered correctly.
    NoWinner,
}

/// Public projection of a match.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchView {
    pub id: Uuid,
    pub status: MatchStatus,
    pub stake: u64,
    pub pot: u64,
    pub rake_percent: u8,
    pub duration_ms: u64,
    pub creator_id: Option<Uuid>,
    pub participants: Vec<ParticipantView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptView>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    pub payout: u64,
    pub house_take: u64,
}

impl From<MatchEntity> for MatchView {
    fn from(value: MatchEntity) -> Self {
        let reveal = value.status == MatchStatus::Completed;
        let creator_id = value.creator();
        let pot = value.pot();
        let winner_id = value.winner_id();
        Self {
            id: value.id,
            status: value.status,
            stake: value.stake,
            pot,
            rake_percent: value.policy.rake_percent,
            duration_ms: value.policy.duration_ms,
            creator_id,
            participants: value
                .participants
                .into_iter()
                .map(|participant| ParticipantView::new(participant, reveal))
                .collect(),
            prompt: value.prompt.map(|prompt| PromptView {
                id: prompt.id,
                title: prompt.title,
                artist: prompt.artist,
                lyrics_snippet: prompt.lyrics_snippet,
                answer: reveal.then_some(prompt.answer),
            }),
            created_at: format_system_time(value.created_at),
            started_at: value.started_at.map(format_system_time),
            deadline_at: value.deadline_at.map(format_system_time),
            completed_at: value.completed_at.map(format_system_time),
            outcome: value.outcome.map(|outcome| match outcome {
                MatchOutcome::Winner { .. } => OutcomeKind::Winner,
                MatchOutcome::Push => OutcomeKind::Push,
                MatchOutcome::NoWinner => OutcomeKind::NoWinner,
            }),
            winner_id,
            payout: value.payout,
            house_take: value.house_take,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{AnswerEntity, MatchPolicy, MatchPromptEntity};

    fn started() -> MatchEntity {
        let now = SystemTime::now();
        let mut record =
            MatchEntity::open(Uuid::new_v4(), Uuid::new_v4(), 100, MatchPolicy::default(), now);
        record.status = MatchStatus::InProgress;
        record.participants.push(ParticipantEntity::new(Uuid::new_v4(), now));
        record.participants[0].answer = Some(AnswerEntity {
            text: Some("sunshine".into()),
            submitted_at: now,
            correct: true,
            elapsed_ms: 3_000,
            timed_out: false,
        });
        record.prompt = Some(MatchPromptEntity {
            id: Uuid::new_v4(),
            title: "You Are My Sunshine".into(),
            artist: "Jimmie Davis".into(),
            lyrics_snippet: "You are my ____".into(),
            answer: "sunshine".into(),
        });
        record
    }

    #[test]
    fn running_match_hides_answers() {
        let view = MatchView::from(started());
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["prompt"].get("answer"), None);
        assert_eq!(json["participants"][0]["answered"], true);
        assert_eq!(json["participants"][0].get("answer"), None);
        assert_eq!(json["participants"][0].get("correct"), None);
        assert_eq!(json["participants"][1]["answered"], false);
        assert_eq!(json["pot"], 200);
    }

    #[test]
    fn completed_match_reveals_answers() {
        let mut record = started();
        record.status = MatchStatus::Completed;
        let winner = record.participants[0].account_id;
        record.outcome = Some(MatchOutcome::Winner { account_id: winner });

        let view = MatchView::from(record);

        assert_eq!(view.prompt.unwrap().answer.as_deref(), Some("sunshine"));
        assert_eq!(view.participants[0].answer.as_deref(), Some("sunshine"));
        assert_eq!(view.participants[0].correct, Some(true));
        assert_eq!(view.winner_id, Some(winner));
    }

    #[test]
    fn blank_answers_are_rejected() {
        let blank = SubmitAnswerRequest {
            answer: "   ".into(),
        };
        assert!(blank.validate().is_err());
        let zero = CreateMatchRequest { stake: 0 };
        assert!(zero.validate().is_err());
    }
}
