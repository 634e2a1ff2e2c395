use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        ledger_store::GrantOutcome,
        models::{AccountEntity, LedgerCategory, LedgerEntryEntity},
        storage::StorageError,
    },
    dto::account::{AccountView, FreeCreditsResponse, LedgerEntryView, OpenAccountRequest},
    dto::format_system_time,
    error::ServiceError,
    state::SharedState,
};

/// Open an account funded with the configured starting balance.
pub async fn open_account(
    state: &SharedState,
    payload: OpenAccountRequest,
) -> Result<AccountView, ServiceError> {
    let store = state.store().await?;
    let starting_balance = state.config().credits().starting_balance;
    let now = SystemTime::now();

    let account = AccountEntity::new(payload.username, starting_balance, now);
    let opening = if starting_balance > 0 {
        let amount = i64::try_from(starting_balance).map_err(|_| {
            ServiceError::Unavailable(StorageError::corrupted(
                "starting balance exceeds ledger range",
            ))
        })?;
        Some(LedgerEntryEntity::new(
            account.id,
            amount,
            LedgerCategory::FreeGrant,
            None,
            "Welcome credits".into(),
            now,
        ))
    } else {
        None
    };

    store.insert_account(account.clone(), opening).await?;
    info!(account_id = %account.id, username = %account.username, "account opened");
    Ok(account.into())
}

/// Balance, counters and statistics of an account.
pub async fn get_account(state: &SharedState, account_id: Uuid) -> Result<AccountView, ServiceError> {
    let store = state.store().await?;
    store
        .find_account(account_id)
        .await?
        .map(AccountView::from)
        .ok_or_else(|| ServiceError::NotFound(format!("account `{account_id}` not found")))
}

/// Ledger entries of an account, newest first.
pub async fn list_ledger(
    state: &SharedState,
    account_id: Uuid,
) -> Result<Vec<LedgerEntryView>, ServiceError> {
    let store = state.store().await?;
    if store.find_account(account_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "account `{account_id}` not found"
        )));
    }
    let entries = store.list_ledger(account_id).await?;
    Ok(entries.into_iter().map(LedgerEntryView::from).collect())
}

/// Grant the periodic free credits, at most once per configured interval.
pub async fn claim_free_credits(
    state: &SharedState,
    account_id: Uuid,
) -> Result<FreeCreditsResponse, ServiceError> {
    let store = state.store().await?;
    let credits = state.config().credits();
    let now = SystemTime::now();

    match store
        .grant_free_credits(account_id, credits.free_amount, credits.free_interval, now)
        .await?
    {
        GrantOutcome::Granted { balance } => {
            info!(account_id = %account_id, amount = credits.free_amount, balance, "free credits claimed");
            Ok(FreeCreditsResponse {
                granted: credits.free_amount,
                balance,
                next_claim_at: format_system_time(now + credits.free_interval),
            })
        }
        GrantOutcome::TooEarly { next_claim_at } => {
            Err(ServiceError::ClaimTooEarly { next_claim_at })
        }
        GrantOutcome::UnknownAccount => Err(ServiceError::NotFound(format!(
            "account `{account_id}` not found"
        ))),
    }
}
