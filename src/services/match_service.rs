//! Match lifecycle: create, join, answer, cancel and deadline handling.

use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        ledger_store::AnswerWrite,
        models::{AnswerEntity, MatchEntity, MatchPromptEntity, ParticipantEntity},
        storage::StorageError,
    },
    dto::matches::AnswerAck,
    error::ServiceError,
    services::{
        judge,
        settlement::{self, SettleOutcome},
        sse_events,
    },
    state::{
        SharedState,
        match_machine::{MatchEvent, MatchStatus, plan},
    },
};

/// Open a waiting match after escrowing the creator's stake.
pub async fn create_match(
    state: &SharedState,
    account_id: Uuid,
    stake: u64,
) -> Result<MatchEntity, ServiceError> {
    let policy = state.config().policy();
    if stake < policy.min_stake || stake > policy.max_stake {
        return Err(ServiceError::InvalidInput(format!(
            "stake must be between {} and {} credits",
            policy.min_stake, policy.max_stake
        )));
    }

    let store = state.store().await?;
    let match_id = Uuid::new_v4();
    if !state
        .escrow()
        .reserve(store.as_ref(), account_id, stake, match_id)
        .await?
    {
        return Err(ServiceError::InsufficientFunds { required: stake });
    }

    let record = MatchEntity::open(match_id, account_id, stake, policy, SystemTime::now());
    if let Err(err) = store.insert_match(record.clone()).await {
        // The insert may have landed before the connection dropped.
        match store.find_match(match_id).await {
            Ok(Some(_)) => {
                warn!(match_id = %match_id, error = %err, "match insert acknowledged late; keeping it");
            }
            Ok(None) => {
                warn!(match_id = %match_id, error = %err, "failed to persist new match; refunding stake");
                refund(state, account_id, stake, match_id).await;
                return Err(err.into());
            }
            Err(read_err) => {
                error!(
                    match_id = %match_id,
                    account_id = %account_id,
                    error = %read_err,
                    "cannot tell whether the match was stored; stake left reserved"
                );
                return Err(err.into());
            }
        }
    }

    info!(match_id = %match_id, account_id = %account_id, stake, "match created");
    sse_events::broadcast_match_created(state, &record);
    Ok(record)
}

/// Seat `account_id` as the opponent, draw a prompt and open the answer window.
pub async fn join_match(
    state: &SharedState,
    match_id: Uuid,
    account_id: Uuid,
) -> Result<MatchEntity, ServiceError> {
    let store = state.store().await?;
    let record = load(state, match_id).await?;

    ensure_joinable(&record)?;
    if record.creator() == Some(account_id) {
        return Err(ServiceError::InvalidInput(
            "cannot join a match you created".into(),
        ));
    }

    let prompt = store
        .random_active_prompt()
        .await?
        .ok_or_else(|| ServiceError::InvalidState("no active prompt available".into()))?;

    if !state
        .escrow()
        .reserve(store.as_ref(), account_id, record.stake, match_id)
        .await?
    {
        return Err(ServiceError::InsufficientFunds {
            required: record.stake,
        });
    }

    let started_at = SystemTime::now();
    let deadline_at = started_at + record.policy.duration();
    let joined = store
        .start_match(
            match_id,
            ParticipantEntity::new(account_id, started_at),
            MatchPromptEntity::from(prompt),
            started_at,
            deadline_at,
        )
        .await;

    let started = match joined {
        Ok(Some(started)) => started,
        Ok(None) => {
            // Someone else joined or the match was cancelled in the meantime.
            refund(state, account_id, record.stake, match_id).await;
            let current = load(state, match_id).await?;
            ensure_joinable(&current)?;
            return Err(ServiceError::MatchFull);
        }
        Err(err) => match seated_after_failure(state, match_id, account_id, record.stake, &err).await {
            Some(started) => started,
            None => return Err(err.into()),
        },
    };

    if started.status == MatchStatus::InProgress {
        state
            .clock()
            .arm(match_id, started.deadline_at.unwrap_or(deadline_at));
    }
    info!(match_id = %match_id, account_id = %account_id, "match started");
    sse_events::broadcast_match_started(state, &started);
    Ok(started)
}

/// Decide the fate of a join whose write reported a failure that may have been applied.
///
/// Returns the started match when the joiner holds a seat. Otherwise refunds the stake,
/// unless the match cannot be read back, in which case the stake stays reserved.
async fn seated_after_failure(
    state: &SharedState,
    match_id: Uuid,
    account_id: Uuid,
    stake: u64,
    err: &StorageError,
) -> Option<MatchEntity> {
    let current = match state.store().await {
        Ok(store) => store.find_match(match_id).await.map_err(ServiceError::from),
        Err(read_err) => Err(read_err),
    };
    match current {
        Ok(Some(record))
            if record.status != MatchStatus::Waiting && record.participant(account_id).is_some() =>
        {
            warn!(match_id = %match_id, account_id = %account_id, error = %err, "join acknowledged late; keeping the seat");
            Some(record)
        }
        Ok(_) => {
            warn!(match_id = %match_id, error = %err, "join failed; refunding stake");
            refund(state, account_id, stake, match_id).await;
            None
        }
        Err(read_err) => {
            error!(
                match_id = %match_id,
                account_id = %account_id,
                error = %read_err,
                "cannot tell whether the join was stored; stake left reserved"
            );
            None
        }
    }
}

fn ensure_joinable(record: &MatchEntity) -> Result<(), ServiceError> {
    match record.status {
        MatchStatus::Waiting if record.participants.len() == 1 => Ok(()),
        MatchStatus::Cancelled => Err(ServiceError::MatchNotActive(MatchStatus::Cancelled)),
        _ => Err(ServiceError::MatchFull),
    }
}

/// Record the answer of a participant and settle the match once both slots are decided.
///
/// A submission arriving after the deadline is stored as a timeout.
pub async fn submit_answer(
    state: &SharedState,
    match_id: Uuid,
    account_id: Uuid,
    text: String,
) -> Result<AnswerAck, ServiceError> {
    let store = state.store().await?;
    let record = load(state, match_id).await?;

    let Some(seat) = record.participant(account_id) else {
        return Err(ServiceError::Forbidden(
            "account does not take part in this match".into(),
        ));
    };
    if seat.is_decided() {
        return Err(ServiceError::AlreadyAnswered);
    }
    if record.status != MatchStatus::InProgress {
        return Err(ServiceError::MatchNotActive(record.status));
    }

    let answer = evaluate(&record, text, SystemTime::now())?;
    let (elapsed_ms, timed_out) = (answer.elapsed_ms, answer.timed_out);

    let updated = match store.record_answer(match_id, account_id, answer).await? {
        AnswerWrite::Recorded(updated) => updated,
        AnswerWrite::AlreadyAnswered => return Err(ServiceError::AlreadyAnswered),
        AnswerWrite::NotActive(status) => return Err(ServiceError::MatchNotActive(status)),
        AnswerWrite::NotParticipant => {
            return Err(ServiceError::Forbidden(
                "account does not take part in this match".into(),
            ));
        }
        AnswerWrite::NotFound => return Err(ServiceError::MatchNotFound),
    };

    debug!(match_id = %match_id, account_id = %account_id, elapsed_ms, timed_out, "answer recorded");
    sse_events::broadcast_answer_recorded(state, match_id, account_id, timed_out, updated.status);

    let status = if updated.all_decided() {
        settle_decided(state, match_id).await.unwrap_or(updated.status)
    } else {
        updated.status
    };

    Ok(AnswerAck {
        match_id,
        elapsed_ms,
        timed_out,
        status,
    })
}

/// Judge a submission against the prompt and the answer window of `record`.
fn evaluate(record: &MatchEntity, text: String, now: SystemTime) -> Result<AnswerEntity, ServiceError> {
    let (Some(prompt), Some(started_at), Some(deadline_at)) =
        (record.prompt.as_ref(), record.started_at, record.deadline_at)
    else {
        return Err(StorageError::corrupted(format!(
            "in-progress match `{}` has no prompt or answer window",
            record.id
        ))
        .into());
    };

    if now >= deadline_at {
        return Ok(AnswerEntity {
            text: Some(text),
            submitted_at: now,
            correct: false,
            elapsed_ms: record.policy.duration_ms,
            timed_out: true,
        });
    }

    Ok(AnswerEntity {
        correct: judge::is_correct(&text, &prompt.answer),
        elapsed_ms: judge::elapsed_ms(started_at, now),
        text: Some(text),
        submitted_at: now,
        timed_out: false,
    })
}

/// Run a settlement triggered by a decided match. Failures are left to the sweeper.
async fn settle_decided(state: &SharedState, match_id: Uuid) -> Option<MatchStatus> {
    match settlement::settle(state, match_id).await {
        Ok(SettleOutcome::Settled(settled)) => Some(settled.status),
        Ok(SettleOutcome::AlreadySettled) => Some(MatchStatus::Completed),
        Ok(SettleOutcome::Conflict) => Some(MatchStatus::Settling),
        Ok(SettleOutcome::Undecided) => None,
        Err(err) => {
            warn!(match_id = %match_id, error = %err, "settlement deferred to the sweeper");
            None
        }
    }
}

/// Load a match.
pub async fn get_match(state: &SharedState, match_id: Uuid) -> Result<MatchEntity, ServiceError> {
    load(state, match_id).await
}

/// Waiting matches, newest first.
pub async fn list_open_matches(state: &SharedState) -> Result<Vec<MatchEntity>, ServiceError> {
    let store = state.store().await?;
    Ok(store.list_matches(MatchStatus::Waiting).await?)
}

/// Cancel a waiting match on behalf of its creator and refund the stake.
pub async fn cancel_match(
    state: &SharedState,
    match_id: Uuid,
    account_id: Uuid,
) -> Result<MatchEntity, ServiceError> {
    let record = load(state, match_id).await?;
    if record.creator() != Some(account_id) {
        return Err(ServiceError::Forbidden(
            "only the creator may cancel a match".into(),
        ));
    }
    if record.status != MatchStatus::Waiting {
        return Err(ServiceError::MatchNotActive(record.status));
    }

    match cancel_waiting(state, record).await? {
        Ok(cancelled) => Ok(cancelled),
        Err(status) => Err(ServiceError::MatchNotActive(status)),
    }
}

/// Cancel every waiting match whose waiting window elapsed. Returns how many were cancelled.
pub async fn expire_waiting(state: &SharedState, now: SystemTime) -> Result<usize, ServiceError> {
    let store = state.store().await?;
    let mut expired = 0;
    for record in store.list_matches(MatchStatus::Waiting).await? {
        if record.waiting_expires_at() > now {
            continue;
        }
        let match_id = record.id;
        match cancel_waiting(state, record).await {
            Ok(Ok(_)) => {
                info!(match_id = %match_id, "waiting match expired");
                expired += 1;
            }
            Ok(Err(status)) => {
                debug!(match_id = %match_id, status = status.as_str(), "match left waiting before expiry");
            }
            Err(err) => warn!(match_id = %match_id, error = %err, "failed to expire waiting match"),
        }
    }
    Ok(expired)
}

/// Move a waiting match to `cancelled` and refund its creator.
///
/// The inner `Err` carries the status observed when another transition won the race.
async fn cancel_waiting(
    state: &SharedState,
    mut record: MatchEntity,
) -> Result<Result<MatchEntity, MatchStatus>, ServiceError> {
    let store = state.store().await?;
    let now = SystemTime::now();
    let transition = plan(MatchStatus::Waiting, MatchEvent::Cancel)?;

    if !store.transition_match(record.id, transition, now).await? {
        let current = load(state, record.id).await?;
        return Ok(Err(current.status));
    }

    record.status = MatchStatus::Cancelled;
    record.completed_at = Some(now);
    if let Some(creator) = record.creator() {
        refund(state, creator, record.stake, record.id).await;
    }

    info!(match_id = %record.id, "match cancelled");
    sse_events::broadcast_match_cancelled(state, &record);
    Ok(Ok(record))
}

/// Close every open slot of an expired match and settle it.
pub async fn handle_deadline(
    state: &SharedState,
    match_id: Uuid,
) -> Result<Option<SettleOutcome>, ServiceError> {
    let store = state.store().await?;
    let now = SystemTime::now();
    let Some(record) = store.force_timeouts(match_id, now).await? else {
        return Err(ServiceError::MatchNotFound);
    };
    if record.status != MatchStatus::InProgress {
        return Ok(None);
    }

    for seat in &record.participants {
        let forced = seat
            .answer
            .as_ref()
            .is_some_and(|answer| answer.timed_out && answer.text.is_none());
        if forced {
            info!(match_id = %match_id, account_id = %seat.account_id, "answer slot timed out");
            sse_events::broadcast_answer_recorded(
                state,
                match_id,
                seat.account_id,
                true,
                record.status,
            );
        }
    }

    Ok(Some(settlement::settle(state, match_id).await?))
}

/// Drain the clock's expiry channel and resolve every expired match.
pub async fn run_deadline_worker(state: SharedState, mut expired: mpsc::UnboundedReceiver<Uuid>) {
    while let Some(match_id) = expired.recv().await {
        state.clock().disarm(match_id);
        match handle_deadline(&state, match_id).await {
            Ok(Some(outcome)) => debug!(match_id = %match_id, ?outcome, "deadline handled"),
            Ok(None) => debug!(match_id = %match_id, "deadline fired on inactive match"),
            Err(err) => warn!(
                match_id = %match_id,
                error = %err,
                "failed to handle deadline; the sweeper will retry"
            ),
        }
    }
    debug!("deadline channel closed");
}

async fn load(state: &SharedState, match_id: Uuid) -> Result<MatchEntity, ServiceError> {
    let store = state.store().await?;
    store
        .find_match(match_id)
        .await?
        .ok_or(ServiceError::MatchNotFound)
}

/// Refund through the escrow; failures stay outstanding and are retried by the sweeper.
async fn refund(state: &SharedState, account_id: Uuid, amount: u64, match_id: Uuid) {
    let store = match state.store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(match_id = %match_id, error = %err, "cannot refund stake right now");
            return;
        }
    };
    if let Err(err) = state
        .escrow()
        .release(store.as_ref(), account_id, amount, match_id)
        .await
    {
        warn!(match_id = %match_id, account_id = %account_id, error = %err, "stake refund pending");
    }
}
