//! Winner resolution. Pure functions, no I/O.

use std::time::SystemTime;

use crate::dao::models::{MatchOutcome, ParticipantEntity};

/// Case-insensitive comparison of trimmed answers.
pub fn is_correct(submitted: &str, accepted: &str) -> bool {
    normalize(submitted) == normalize(accepted)
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Milliseconds between the start of the answer window and a submission.
pub fn elapsed_ms(started_at: SystemTime, submitted_at: SystemTime) -> u64 {
    submitted_at
        .duration_since(started_at)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Decide the outcome of a match from its two participants.
///
/// A missing answer counts as an incorrect non-submission.
pub fn judge(first: &ParticipantEntity, second: &ParticipantEntity) -> MatchOutcome {
    match (correct_elapsed(first), correct_elapsed(second)) {
        (Some(_), None) => MatchOutcome::Winner {
            account_id: first.account_id,
        },
        (None, Some(_)) => MatchOutcome::Winner {
            account_id: second.account_id,
        },
        (Some(a), Some(b)) if a < b => MatchOutcome::Winner {
            account_id: first.account_id,
        },
        (Some(a), Some(b)) if b < a => MatchOutcome::Winner {
            account_id: second.account_id,
        },
        (Some(_), Some(_)) => MatchOutcome::Push,
        (None, None) => MatchOutcome::NoWinner,
    }
}

fn correct_elapsed(participant: &ParticipantEntity) -> Option<u64> {
    participant
        .answer
        .as_ref()
        .filter(|answer| answer.correct)
        .map(|answer| answer.elapsed_ms)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::dao::models::AnswerEntity;

    fn answered(correct: bool, elapsed_ms: u64) -> ParticipantEntity {
        ParticipantEntity {
            account_id: Uuid::new_v4(),
            joined_at: SystemTime::UNIX_EPOCH,
            answer: Some(AnswerEntity {
                text: Some("text".into()),
                submitted_at: SystemTime::UNIX_EPOCH,
                correct,
                elapsed_ms,
                timed_out: false,
            }),
        }
    }

    fn timed_out() -> ParticipantEntity {
        ParticipantEntity {
            account_id: Uuid::new_v4(),
            joined_at: SystemTime::UNIX_EPOCH,
            answer: Some(AnswerEntity::timeout(30_000, SystemTime::UNIX_EPOCH)),
        }
    }

    #[test]
    fn faster_correct_answer_wins() {
        let a = answered(true, 4_200);
        let b = answered(true, 6_100);
        assert_eq!(
            judge(&a, &b),
            MatchOutcome::Winner {
                account_id: a.account_id
            }
        );
        assert_eq!(
            judge(&b, &a),
            MatchOutcome::Winner {
                account_id: a.account_id
            }
        );
    }

    #[test]
    fn only_correct_answer_wins_even_when_slower() {
        let a = answered(false, 1_000);
        let b = answered(true, 9_000);
        assert_eq!(
            judge(&a, &b),
            MatchOutcome::Winner {
                account_id: b.account_id
            }
        );
    }

    #[test]
    fn both_wrong_has_no_winner() {
        assert_eq!(
            judge(&answered(false, 1_000), &answered(false, 2_000)),
            MatchOutcome::NoWinner
        );
    }

    #[test]
    fn identical_correct_times_push() {
        assert_eq!(
            judge(&answered(true, 5_000), &answered(true, 5_000)),
            MatchOutcome::Push
        );
    }

    #[test]
    fn timeout_loses_to_a_correct_answer() {
        let a = timed_out();
        let b = answered(true, 29_999);
        assert_eq!(
            judge(&a, &b),
            MatchOutcome::Winner {
                account_id: b.account_id
            }
        );
        assert_eq!(judge(&a, &timed_out()), MatchOutcome::NoWinner);
    }

    #[test]
    fn unanswered_seat_counts_as_incorrect() {
        let mut a = answered(true, 10);
        a.answer = None;
        assert_eq!(judge(&a, &answered(false, 10)), MatchOutcome::NoWinner);
    }

    #[test]
    fn comparison_ignores_case_and_surrounding_whitespace() {
        assert!(is_correct("  SunShine \n", "sunshine"));
        assert!(!is_correct("sunset", "sunshine"));
        assert!(!is_correct("sun shine", "sunshine"));
    }

    #[test]
    fn elapsed_is_measured_from_the_start() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert_eq!(elapsed_ms(start, start + Duration::from_millis(4_200)), 4_200);
        assert_eq!(elapsed_ms(start, start - Duration::from_secs(1)), 0);
    }
}
