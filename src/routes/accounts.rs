use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::account::{AccountView, FreeCreditsResponse, LedgerEntryView, OpenAccountRequest},
    error::AppError,
    routes::extract::AccountId,
    services::account_service,
    state::SharedState,
};

/// Account management endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/me", get(get_account))
        .route("/accounts/me/ledger", get(list_ledger))
        .route("/accounts/me/free-credits", post(claim_free_credits))
}

/// Open a new account funded with the starting balance.
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "accounts",
    request_body = OpenAccountRequest,
    responses(
        (status = 201, description = "Account opened", body = AccountView),
        (status = 400, description = "Invalid username")
    )
)]
pub async fn open_account(
    State(state): State<SharedState>,
    Json(payload): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<AccountView>), AppError> {
    payload.validate()?;
    let account = account_service::open_account(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Balance, counters and statistics of the calling account.
#[utoipa::path(
    get,
    path = "/accounts/me",
    tag = "accounts",
    params(("X-Account-Id" = String, Header, description = "Identifier of the calling account")),
    responses(
        (status = 200, description = "Account", body = AccountView),
        (status = 404, description = "Unknown account")
    )
)]
pub async fn get_account(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
) -> Result<Json<AccountView>, AppError> {
    Ok(Json(account_service::get_account(&state, account_id).await?))
}

/// Balance history of the calling account, newest first.
#[utoipa::path(
    get,
    path = "/accounts/me/ledger",
    tag = "accounts",
    params(("X-Account-Id" = String, Header, description = "Identifier of the calling account")),
    responses((status = 200, description = "Ledger entries", body = [LedgerEntryView]))
)]
pub async fn list_ledger(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
) -> Result<Json<Vec<LedgerEntryView>>, AppError> {
    Ok(Json(account_service::list_ledger(&state, account_id).await?))
}

/// Claim the periodic free credits.
#[utoipa::path(
    post,
    path = "/accounts/me/free-credits",
    tag = "accounts",
    params(("X-Account-Id" = String, Header, description = "Identifier of the calling account")),
    responses(
        (status = 200, description = "Credits granted", body = FreeCreditsResponse),
        (status = 429, description = "Claimed too recently")
    )
)]
pub async fn claim_free_credits(
    State(state): State<SharedState>,
    AccountId(account_id): AccountId,
) -> Result<Json<FreeCreditsResponse>, AppError> {
    Ok(Json(
        account_service::claim_free_credits(&state, account_id).await?,
    ))
}
