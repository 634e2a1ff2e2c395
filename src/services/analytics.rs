//! Advisory per-match analytics, written out-of-band after settlement.

use std::time::{Duration, SystemTime};

use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, warn};

use crate::{
    dao::models::{MatchAnalyticsEntity, MatchEntity},
    state::SharedState,
};

const QUEUE_CAPACITY: usize = 256;
const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Analytics record waiting to be written.
pub type AnalyticsJob = MatchAnalyticsEntity;

/// Sending side of the analytics worker queue.
pub struct AnalyticsQueue {
    sender: mpsc::Sender<AnalyticsJob>,
}

impl AnalyticsQueue {
    /// Create the queue together with the receiver the worker drains.
    pub fn new() -> (Self, mpsc::Receiver<AnalyticsJob>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        (Self { sender }, receiver)
    }

    /// Hand a record to the worker without waiting. A full queue drops the record.
    pub fn enqueue(&self, job: AnalyticsJob) {
        if let Err(err) = self.sender.try_send(job) {
            warn!(error = %err, "analytics queue rejected record; dropping it");
        }
    }
}

/// Build the analytics of a settled match. Returns `None` when no prompt was played.
pub fn summarize(record: &MatchEntity, now: SystemTime) -> Option<MatchAnalyticsEntity> {
    let prompt = record.prompt.as_ref()?;
    let total_players = u32::try_from(record.participants.len()).unwrap_or(u32::MAX);

    let answers: Vec<_> = record
        .participants
        .iter()
        .filter_map(|participant| participant.answer.as_ref())
        .collect();
    let in_time: Vec<u64> = answers
        .iter()
        .filter(|answer| !answer.timed_out)
        .map(|answer| answer.elapsed_ms)
        .collect();
    let correct_answers =
        u32::try_from(answers.iter().filter(|answer| answer.correct).count()).unwrap_or(u32::MAX);

    let average_response_ms = (!in_time.is_empty())
        .then(|| in_time.iter().sum::<u64>() / in_time.len() as u64);
    let completion_rate = if total_players == 0 {
        0.0
    } else {
        in_time.len() as f32 * 100.0 / total_players as f32
    };

    Some(MatchAnalyticsEntity {
        match_id: record.id,
        prompt_id: prompt.id,
        total_players,
        average_response_ms,
        completion_rate,
        correct_answers,
        created_at: now,
    })
}

/// Drain the analytics queue, retrying each record with exponential back-off.
pub async fn run_worker(state: SharedState, mut receiver: mpsc::Receiver<AnalyticsJob>) {
    while let Some(job) = receiver.recv().await {
        write_with_retry(&state, job).await;
    }
    debug!("analytics queue closed");
}

async fn write_with_retry(state: &SharedState, job: AnalyticsJob) -> bool {
    let match_id = job.match_id;
    let mut delay = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        let result = match state.store().await {
            Ok(store) => store
                .record_match_analytics(job.clone())
                .await
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };

        match result {
            Ok(()) => {
                debug!(match_id = %match_id, attempt, "match analytics recorded");
                return true;
            }
            Err(err) if attempt < MAX_ATTEMPTS => {
                debug!(match_id = %match_id, attempt, error = %err, "analytics write failed; retrying");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
            }
            Err(err) => {
                warn!(match_id = %match_id, attempt, error = %err, "giving up on match analytics");
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            ledger_store::{LedgerStore, memory::MemoryLedgerStore},
            models::{AnswerEntity, MatchPolicy, MatchPromptEntity, ParticipantEntity, PromptEntity},
        },
        state::AppState,
    };

    fn settled_match(prompt_id: Uuid) -> MatchEntity {
        let now = SystemTime::now();
        let mut record =
            MatchEntity::open(Uuid::new_v4(), Uuid::new_v4(), 100, MatchPolicy::default(), now);
        record.participants[0].answer = Some(AnswerEntity {
            text: Some("sunshine".into()),
            submitted_at: now,
            correct: true,
            elapsed_ms: 3_000,
            timed_out: false,
        });
        record.participants.push(ParticipantEntity {
            account_id: Uuid::new_v4(),
            joined_at: now,
            answer: Some(AnswerEntity::timeout(30_000, now)),
        });
        record.prompt = Some(MatchPromptEntity {
            id: prompt_id,
            title: "You Are My Sunshine".into(),
            artist: "Jimmie Davis".into(),
            lyrics_snippet: "You are my ____".into(),
            answer: "sunshine".into(),
        });
        record
    }

    #[test]
    fn summary_ignores_timeouts_in_the_average() {
        let record = settled_match(Uuid::new_v4());
        let analytics = summarize(&record, SystemTime::now()).unwrap();

        assert_eq!(analytics.total_players, 2);
        assert_eq!(analytics.average_response_ms, Some(3_000));
        assert_eq!(analytics.completion_rate, 50.0);
        assert_eq!(analytics.correct_answers, 1);
    }

    #[test]
    fn summary_requires_a_prompt() {
        let mut record = settled_match(Uuid::new_v4());
        record.prompt = None;
        assert!(summarize(&record, SystemTime::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn worker_retries_until_storage_comes_back() {
        let (state, channels) = AppState::new(AppConfig::default());
        let store = MemoryLedgerStore::new();
        let prompt = PromptEntity {
            id: Uuid::new_v4(),
            title: "t".into(),
            artist: "a".into(),
            lyrics_snippet: "s".into(),
            answer: "sunshine".into(),
            active: true,
            times_played: 0,
            times_correct: 0,
            created_at: SystemTime::now(),
        };
        store.insert_prompt(prompt.clone()).await.unwrap();

        tokio::spawn(run_worker(state.clone(), channels.analytics));
        let record = settled_match(prompt.id);
        state
            .analytics()
            .enqueue(summarize(&record, SystemTime::now()).unwrap());

        // First attempt hits degraded mode.
        sleep(Duration::from_millis(100)).await;
        state.set_store(Arc::new(store.clone())).await;
        sleep(Duration::from_secs(2)).await;

        let prompts = store.list_prompts().await.unwrap();
        assert_eq!(prompts[0].times_played, 1);
        assert_eq!(prompts[0].times_correct, 1);
    }
}
