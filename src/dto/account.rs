//! DTOs for account, balance and ledger endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{AccountEntity, LedgerEntryEntity},
    dto::{format_system_time, validation::validate_username},
};

/// Payload used to open a new account.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OpenAccountRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,
}

/// Public projection of an account with its statistics.
#[derive(Debug, Serialize, ToSchema)]
pub struct AccountView {
    pub id: Uuid,
    pub username: String,
    pub balance: u64,
    pub games_played: u32,
    pub wins: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_correct_ms: Option<u64>,
    /// Mean response time over answers submitted before the deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_response_ms: Option<u64>,
    pub total_credits_earned: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_free_claim_at: Option<String>,
    pub created_at: String,
}

impl From<AccountEntity> for AccountView {
    fn from(value: AccountEntity) -> Self {
        let average_response_ms = (value.answered_count > 0)
            .then(|| value.total_response_ms / u64::from(value.answered_count));
        Self {
            id: value.id,
            username: value.username,
            balance: value.balance,
            games_played: value.games_played,
            wins: value.wins,
            current_streak: value.current_streak,
            longest_streak: value.longest_streak,
            fastest_correct_ms: value.fastest_correct_ms,
            average_response_ms,
            total_credits_earned: value.total_credits_earned,
            last_free_claim_at: value.last_free_claim_at.map(format_system_time),
            created_at: format_system_time(value.created_at),
        }
    }
}

/// One balance movement as shown in the account history.
#[derive(Debug, Serialize, ToSchema)]
pub struct LedgerEntryView {
    pub id: Uuid,
    /// Signed amount: negative for debits.
    pub amount: i64,
    /// One of `stake_debit`, `stake_refund`, `win_credit`, `free_grant`, `purchase`.
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<Uuid>,
    pub description: String,
    pub created_at: String,
}

impl From<LedgerEntryEntity> for LedgerEntryView {
    fn from(value: LedgerEntryEntity) -> Self {
        Self {
            id: value.id,
            amount: value.amount,
            category: value.category.as_str().to_string(),
            match_id: value.match_id,
            description: value.description,
            created_at: format_system_time(value.created_at),
        }
    }
}

/// Result of a successful free credits claim.
#[derive(Debug, Serialize, ToSchema)]
pub struct FreeCreditsResponse {
    pub granted: u64,
    pub balance: u64,
    pub next_claim_at: String,
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn average_response_is_derived_from_counters() {
        let mut account = AccountEntity::new("sam".into(), 250, SystemTime::UNIX_EPOCH);
        assert_eq!(AccountView::from(account.clone()).average_response_ms, None);

        account.total_response_ms = 9_000;
        account.answered_count = 2;
        account.last_free_claim_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(60));
        let view = AccountView::from(account);

        assert_eq!(view.average_response_ms, Some(4_500));
        assert_eq!(view.last_free_claim_at.as_deref(), Some("1970-01-01T00:01:00Z"));
    }

    #[test]
    fn open_request_rejects_bad_usernames() {
        let ok = OpenAccountRequest {
            username: "sam_01".into(),
        };
        assert!(ok.validate().is_ok());
        let bad = OpenAccountRequest {
            username: "s m".into(),
        };
        assert!(bad.validate().is_err());
    }
}
