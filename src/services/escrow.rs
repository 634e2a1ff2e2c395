use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::ledger_store::{LedgerStore, ReleaseOutcome, ReserveOutcome},
    error::ServiceError,
};

/// Stake reservation and refund on top of the store's atomic balance operations.
///
/// Refunds that could not be written are remembered per (match, account) and retried by
/// the sweeper; the store's refund key keeps every retry idempotent.
pub struct StakeEscrow {
    outstanding: DashMap<(Uuid, Uuid), u64>,
}

impl StakeEscrow {
    /// Create an escrow with no outstanding refunds.
    pub fn new() -> Self {
        Self {
            outstanding: DashMap::new(),
        }
    }

    /// Debit `amount` from `account_id` for `match_id`.
    ///
    /// Returns `false` when the balance does not cover the amount; nothing is written then.
    pub async fn reserve(
        &self,
        store: &dyn LedgerStore,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
    ) -> Result<bool, ServiceError> {
        match store
            .reserve_stake(account_id, amount, match_id, SystemTime::now())
            .await?
        {
            ReserveOutcome::Granted { balance } => {
                debug!(account_id = %account_id, match_id = %match_id, amount, balance, "stake reserved");
                Ok(true)
            }
            ReserveOutcome::Insufficient => Ok(false),
            ReserveOutcome::UnknownAccount => Err(ServiceError::NotFound(format!(
                "account `{account_id}` not found"
            ))),
        }
    }

    /// Credit `amount` back to `account_id` for `match_id`, at most once.
    ///
    /// A storage failure keeps the refund outstanding so [`StakeEscrow::retry_outstanding`]
    /// can complete it later.
    pub async fn release(
        &self,
        store: &dyn LedgerStore,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
    ) -> Result<(), ServiceError> {
        match store
            .release_stake(account_id, amount, match_id, SystemTime::now())
            .await
        {
            Ok(ReleaseOutcome::Refunded { balance }) => {
                self.outstanding.remove(&(match_id, account_id));
                info!(account_id = %account_id, match_id = %match_id, amount, balance, "stake refunded");
                Ok(())
            }
            Ok(ReleaseOutcome::AlreadyRefunded) => {
                self.outstanding.remove(&(match_id, account_id));
                debug!(account_id = %account_id, match_id = %match_id, "stake already refunded");
                Ok(())
            }
            Ok(ReleaseOutcome::UnknownAccount) => {
                self.outstanding.remove(&(match_id, account_id));
                Err(ServiceError::NotFound(format!(
                    "account `{account_id}` not found"
                )))
            }
            Err(err) => {
                warn!(
                    account_id = %account_id,
                    match_id = %match_id,
                    amount,
                    error = %err,
                    "refund failed; keeping it outstanding"
                );
                self.outstanding.insert((match_id, account_id), amount);
                Err(err.into())
            }
        }
    }

    /// Retry every outstanding refund. Returns how many are still outstanding.
    pub async fn retry_outstanding(&self, store: &dyn LedgerStore) -> usize {
        let pending: Vec<((Uuid, Uuid), u64)> = self
            .outstanding
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        for ((match_id, account_id), amount) in pending {
            if let Err(err) = self.release(store, account_id, amount, match_id).await {
                debug!(match_id = %match_id, error = %err, "outstanding refund still failing");
            }
        }

        self.outstanding.len()
    }

    /// Number of refunds waiting for a retry.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

impl Default for StakeEscrow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{ledger_store::memory::MemoryLedgerStore, models::AccountEntity};

    async fn funded(store: &MemoryLedgerStore, balance: u64) -> Uuid {
        let account = AccountEntity::new("player".into(), balance, SystemTime::now());
        let id = account.id;
        store.insert_account(account, None).await.unwrap();
        id
    }

    #[tokio::test]
    async fn reserve_reports_insufficient_funds_as_false() {
        let store = MemoryLedgerStore::new();
        let escrow = StakeEscrow::new();
        let id = funded(&store, 60).await;

        assert!(escrow.reserve(&store, id, 50, Uuid::new_v4()).await.unwrap());
        assert!(!escrow.reserve(&store, id, 50, Uuid::new_v4()).await.unwrap());
        assert_eq!(store.find_account(id).await.unwrap().unwrap().balance, 10);
    }

    #[tokio::test]
    async fn reserve_on_unknown_account_is_an_error() {
        let store = MemoryLedgerStore::new();
        let escrow = StakeEscrow::new();

        let err = escrow
            .reserve(&store, Uuid::new_v4(), 50, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn release_twice_refunds_once() {
        let store = MemoryLedgerStore::new();
        let escrow = StakeEscrow::new();
        let id = funded(&store, 100).await;
        let match_id = Uuid::new_v4();

        assert!(escrow.reserve(&store, id, 100, match_id).await.unwrap());
        escrow.release(&store, id, 100, match_id).await.unwrap();
        escrow.release(&store, id, 100, match_id).await.unwrap();

        assert_eq!(store.find_account(id).await.unwrap().unwrap().balance, 100);
        assert_eq!(escrow.outstanding(), 0);
    }
}
