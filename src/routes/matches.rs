use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::matches::{AnswerAck, CreateMatchRequest, MatchView, SubmitAnswerRequest},
    error::AppError,
    routes::extract::AccountId,
    services::match_service,
    state::SharedState,
};

/// Lobby and match lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/matches", get(list_open_matches).post(create_match))
        .route("/matches/{id}", get(get_match))
        .route("/matches/{id}/join", post(join_match))
        .route("/matches/{id}/answer", post(submit_answer))
        .route("/matches/{id}/cancel", post(cancel_match))
}

/// List matches waiting for an opponent, newest first.
#[utoipa::path(
    get,
    path = "/matches",
    tag = "matches",
    responses((status = 200, description = "Open matches", body = [MatchView]))
)]
pub async fn list_open_matches(
    State(state): State<SharedState>,
) -> Result<Json<Vec<MatchView>>, AppError> {
    let matches = match_service::list_open_matches(&state).await?;
    Ok(Json(matches.into_iter().map(MatchView::from).collect()))
}

/// Open a match and escrow the caller's stake.
#[utoipa::path(
    post,
    path = "/matches",
    tag = "matches",
    params(("X-Account-Id" = String, Header, description = "Identifier of the calling account")),
    request_body = CreateMatchRequest,
    responses(
        (status = 201, description = "Match created", body = MatchView),
        (status = 400, description = "Stake outside the accepted range"),
        (status = 402, description = "Insufficient funds")
    )
)]
pub async fn create_match(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
    Json(payload): Json<CreateMatchRequest>,
) -> Result<(StatusCode, Json<MatchView>), AppError> {
    payload.validate()?;
    let record = match_service::create_match(&state, account_id, payload.stake).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Retrieve a match. Answers stay hidden until it is completed.
#[utoipa::path(
    get,
    path = "/matches/{id}",
    tag = "matches",
    params(("id" = String, Path, description = "Identifier of the match")),
    responses(
        (status = 200, description = "Match", body = MatchView),
        (status = 404, description = "Unknown match")
    )
)]
pub async fn get_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(match_service::get_match(&state, id).await?.into()))
}

/// Take the second seat, escrow the stake and start the answer window.
#[utoipa::path(
    post,
    path = "/matches/{id}/join",
    tag = "matches",
    params(
        ("X-Account-Id" = String, Header, description = "Identifier of the calling account"),
        ("id" = String, Path, description = "Identifier of the match")
    ),
    responses(
        (status = 200, description = "Match started", body = MatchView),
        (status = 402, description = "Insufficient funds"),
        (status = 404, description = "Unknown match"),
        (status = 409, description = "Match full or no longer waiting")
    )
)]
pub async fn join_match(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(
        match_service::join_match(&state, id, account_id).await?.into(),
    ))
}

/// Submit the caller's lyric guess.
#[utoipa::path(
    post,
    path = "/matches/{id}/answer",
    tag = "matches",
    params(
        ("X-Account-Id" = String, Header, description = "Identifier of the calling account"),
        ("id" = String, Path, description = "Identifier of the match")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = AnswerAck),
        (status = 403, description = "Caller does not take part in the match"),
        (status = 409, description = "Already answered or match not active")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<AnswerAck>, AppError> {
    payload.validate()?;
    Ok(Json(
        match_service::submit_answer(&state, id, account_id, payload.answer).await?,
    ))
}

/// Cancel the caller's own waiting match and refund the stake.
#[utoipa::path(
    post,
    path = "/matches/{id}/cancel",
    tag = "matches",
    params(
        ("X-Account-Id" = String, Header, description = "Identifier of the calling account"),
        ("id" = String, Path, description = "Identifier of the match")
    ),
    responses(
        (status = 200, description = "Match cancelled", body = MatchView),
        (status = 403, description = "Caller is not the creator"),
        (status = 409, description = "Match is no longer waiting")
    )
)]
pub async fn cancel_match(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchView>, AppError> {
    Ok(Json(
        match_service::cancel_match(&state, id, account_id).await?.into(),
    ))
}
