use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database,
    bson::{Bson, DateTime, Document, doc},
    error::Error as MongoError,
    options::ReturnDocument,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::{ensure_ledger_indexes, establish_connection},
    error::{MongoDaoError, MongoResult},
    models::{
        ACCOUNT_COLLECTION_NAME, ANALYTICS_COLLECTION_NAME, LEDGER_COLLECTION_NAME,
        MATCH_COLLECTION_NAME, MongoAccountDocument, MongoAnalyticsDocument, MongoAnswerDocument,
        MongoLedgerDocument, MongoMatchDocument, MongoMatchPromptDocument,
        MongoOutcomeDocument, MongoParticipantDocument, MongoPromptDocument,
        PROMPT_COLLECTION_NAME, REFUND_COLLECTION_NAME, amount as stored_amount, doc_id, key,
        refund_doc_id, signed,
    },
};
use crate::{
    dao::{
        ledger_store::{
            AnswerWrite, GrantOutcome, LedgerStore, ReleaseOutcome, ReserveOutcome,
            SettlementCommit,
        },
        models::{
            AccountEntity, AnswerEntity, LedgerCategory, LedgerEntryEntity, MatchAnalyticsEntity,
            MatchEntity, MatchPromptEntity, ParticipantEntity, PromptEntity,
        },
        storage::StorageResult,
    },
    state::match_machine::{MatchStatus, Transition},
};

#[derive(Clone)]
pub struct MongoLedgerStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn tx(operation: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Transaction { operation, source }
}

impl MongoLedgerStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    ///
    /// Multi-document operations run in transactions, so the server must be a replica set.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        ensure_ledger_indexes(&store.database().await).await?;
        Ok(store)
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn accounts(&self) -> Collection<MongoAccountDocument> {
        self.database().await.collection(ACCOUNT_COLLECTION_NAME)
    }

    async fn ledger(&self) -> Collection<MongoLedgerDocument> {
        self.database().await.collection(LEDGER_COLLECTION_NAME)
    }

    async fn refunds(&self) -> Collection<Document> {
        self.database().await.collection(REFUND_COLLECTION_NAME)
    }

    async fn matches(&self) -> Collection<MongoMatchDocument> {
        self.database().await.collection(MATCH_COLLECTION_NAME)
    }

    async fn prompts(&self) -> Collection<MongoPromptDocument> {
        self.database().await.collection(PROMPT_COLLECTION_NAME)
    }

    async fn analytics(&self) -> Collection<MongoAnalyticsDocument> {
        self.database().await.collection(ANALYTICS_COLLECTION_NAME)
    }

    /// Open a session with a started transaction.
    async fn begin(&self, operation: &'static str) -> MongoResult<ClientSession> {
        let client = {
            let guard = self.inner.state.read().await;
            guard.client.clone()
        };
        let mut session = client.start_session().await.map_err(tx(operation))?;
        session.start_transaction().await.map_err(tx(operation))?;
        Ok(session)
    }

    async fn insert_account(
        &self,
        account: AccountEntity,
        opening: Option<LedgerEntryEntity>,
    ) -> MongoResult<()> {
        let id = account.id;
        let document: MongoAccountDocument = account.into();
        let mut session = self.begin("opening an account").await?;

        self.accounts()
            .await
            .insert_one(&document)
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount { id, source })?;

        if let Some(entry) = opening.as_ref() {
            self.ledger()
                .await
                .insert_one(MongoLedgerDocument::from(entry))
                .session(&mut session)
                .await
                .map_err(|source| MongoDaoError::SaveAccount { id, source })?;
        }

        session
            .commit_transaction()
            .await
            .map_err(tx("opening an account"))
    }

    async fn find_account(&self, id: Uuid) -> MongoResult<Option<AccountEntity>> {
        self.accounts()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadAccount { id, source })?
            .map(AccountEntity::try_from)
            .transpose()
    }

    async fn list_ledger(&self, account_id: Uuid) -> MongoResult<Vec<LedgerEntryEntity>> {
        let documents: Vec<MongoLedgerDocument> = self
            .ledger()
            .await
            .find(doc! { "account_id": key(account_id) })
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(|source| MongoDaoError::ListLedger {
                id: account_id,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListLedger {
                id: account_id,
                source,
            })?;

        documents
            .into_iter()
            .map(LedgerEntryEntity::try_from)
            .collect()
    }

    async fn grant_free_credits(
        &self,
        account_id: Uuid,
        amount: u64,
        interval: Duration,
        now: SystemTime,
    ) -> MongoResult<GrantOutcome> {
        let credit = stored_amount(amount)?;
        let cutoff = now.checked_sub(interval).unwrap_or(UNIX_EPOCH);
        let filter = doc! {
            "_id": key(account_id),
            "$or": [
                { "last_free_claim_at": Bson::Null },
                { "last_free_claim_at": { "$lte": DateTime::from_system_time(cutoff) } },
            ],
        };
        let update = doc! {
            "$inc": { "balance": credit },
            "$set": { "last_free_claim_at": DateTime::from_system_time(now) },
        };

        let mut session = self.begin("granting free credits").await?;
        let updated = self
            .accounts()
            .await
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount {
                id: account_id,
                source,
            })?;

        let Some(updated) = updated else {
            session
                .abort_transaction()
                .await
                .map_err(tx("granting free credits"))?;
            return Ok(match self.find_account(account_id).await? {
                Some(account) => GrantOutcome::TooEarly {
                    next_claim_at: account.last_free_claim_at.unwrap_or(now) + interval,
                },
                None => GrantOutcome::UnknownAccount,
            });
        };

        let entry = LedgerEntryEntity::new(
            account_id,
            credit,
            LedgerCategory::FreeGrant,
            None,
            format!("Claimed {amount} free credits"),
            now,
        );
        self.ledger()
            .await
            .insert_one(MongoLedgerDocument::from(&entry))
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount {
                id: account_id,
                source,
            })?;
        session
            .commit_transaction()
            .await
            .map_err(tx("granting free credits"))?;

        let account = AccountEntity::try_from(updated)?;
        Ok(GrantOutcome::Granted {
            balance: account.balance,
        })
    }

    async fn reserve_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> MongoResult<ReserveOutcome> {
        let debit = stored_amount(amount)?;
        let filter = doc! { "_id": key(account_id), "balance": { "$gte": debit } };
        let update = doc! { "$inc": { "balance": -debit } };

        let mut session = self.begin("reserving a stake").await?;
        let updated = self
            .accounts()
            .await
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount {
                id: account_id,
                source,
            })?;

        let Some(updated) = updated else {
            session
                .abort_transaction()
                .await
                .map_err(tx("reserving a stake"))?;
            return Ok(match self.find_account(account_id).await? {
                Some(_) => ReserveOutcome::Insufficient,
                None => ReserveOutcome::UnknownAccount,
            });
        };

        let entry = LedgerEntryEntity::new(
            account_id,
            -debit,
            LedgerCategory::StakeDebit,
            Some(match_id),
            format!("Staked {amount} credits"),
            now,
        );
        self.ledger()
            .await
            .insert_one(MongoLedgerDocument::from(&entry))
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount {
                id: account_id,
                source,
            })?;
        session
            .commit_transaction()
            .await
            .map_err(tx("reserving a stake"))?;

        let account = AccountEntity::try_from(updated)?;
        Ok(ReserveOutcome::Granted {
            balance: account.balance,
        })
    }

    async fn release_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> MongoResult<ReleaseOutcome> {
        let credit = stored_amount(amount)?;
        let mut session = self.begin("releasing a stake").await?;
        let refunds = self.refunds().await;
        let refund_key = refund_doc_id(match_id, account_id);

        let existing = refunds
            .find_one(refund_key.clone())
            .session(&mut session)
            .await
            .map_err(tx("releasing a stake"))?;
        if existing.is_some() {
            session
                .abort_transaction()
                .await
                .map_err(tx("releasing a stake"))?;
            return Ok(ReleaseOutcome::AlreadyRefunded);
        }

        let updated = self
            .accounts()
            .await
            .find_one_and_update(
                doc_id(account_id),
                doc! { "$inc": { "balance": credit } },
            )
            .return_document(ReturnDocument::After)
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount {
                id: account_id,
                source,
            })?;
        let Some(updated) = updated else {
            session
                .abort_transaction()
                .await
                .map_err(tx("releasing a stake"))?;
            return Ok(ReleaseOutcome::UnknownAccount);
        };

        // Concurrent releases conflict on this insert and abort.
        refunds
            .insert_one(refund_key)
            .session(&mut session)
            .await
            .map_err(tx("releasing a stake"))?;

        let entry = LedgerEntryEntity::new(
            account_id,
            credit,
            LedgerCategory::StakeRefund,
            Some(match_id),
            format!("Refunded {amount} credits"),
            now,
        );
        self.ledger()
            .await
            .insert_one(MongoLedgerDocument::from(&entry))
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAccount {
                id: account_id,
                source,
            })?;
        session
            .commit_transaction()
            .await
            .map_err(tx("releasing a stake"))?;

        let account = AccountEntity::try_from(updated)?;
        Ok(ReleaseOutcome::Refunded {
            balance: account.balance,
        })
    }

    async fn insert_match(&self, record: MatchEntity) -> MongoResult<()> {
        let id = record.id;
        let document: MongoMatchDocument = record.into();
        self.matches()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?;
        Ok(())
    }

    async fn find_match(&self, id: Uuid) -> MongoResult<Option<MatchEntity>> {
        self.matches()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadMatch { id, source })?
            .map(MatchEntity::try_from)
            .transpose()
    }

    async fn list_matches(&self, status: MatchStatus) -> MongoResult<Vec<MatchEntity>> {
        let documents: Vec<MongoMatchDocument> = self
            .matches()
            .await
            .find(doc! { "status": status.as_str() })
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(|source| MongoDaoError::ListMatches { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListMatches { source })?;

        documents.into_iter().map(MatchEntity::try_from).collect()
    }

    async fn start_match(
        &self,
        id: Uuid,
        opponent: ParticipantEntity,
        prompt: MatchPromptEntity,
        started_at: SystemTime,
        deadline_at: SystemTime,
    ) -> MongoResult<Option<MatchEntity>> {
        let opponent_key = key(opponent.account_id);
        let filter = doc! {
            "_id": key(id),
            "status": MatchStatus::Waiting.as_str(),
            "participants.1": { "$exists": false },
            "participants.account_id": { "$ne": opponent_key },
        };
        let update = doc! {
            "$push": { "participants": MongoParticipantDocument::from(opponent).to_document() },
            "$set": {
                "status": MatchStatus::InProgress.as_str(),
                "prompt": MongoMatchPromptDocument::from(prompt).to_document(),
                "started_at": DateTime::from_system_time(started_at),
                "deadline_at": DateTime::from_system_time(deadline_at),
            },
        };

        self.matches()
            .await
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?
            .map(MatchEntity::try_from)
            .transpose()
    }

    async fn record_answer(
        &self,
        id: Uuid,
        account_id: Uuid,
        answer: AnswerEntity,
    ) -> MongoResult<AnswerWrite> {
        let filter = doc! {
            "_id": key(id),
            "status": MatchStatus::InProgress.as_str(),
            "participants": {
                "$elemMatch": { "account_id": key(account_id), "answer": Bson::Null }
            },
        };
        let update = doc! {
            "$set": { "participants.$.answer": MongoAnswerDocument::from(answer).to_document() }
        };

        let updated = self
            .matches()
            .await
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?;

        if let Some(document) = updated {
            return Ok(AnswerWrite::Recorded(MatchEntity::try_from(document)?));
        }

        // The conditional write missed; report which precondition failed.
        let Some(record) = self.find_match(id).await? else {
            return Ok(AnswerWrite::NotFound);
        };
        Ok(match record.participant(account_id) {
            None => AnswerWrite::NotParticipant,
            Some(seat) if seat.is_decided() => AnswerWrite::AlreadyAnswered,
            Some(_) => AnswerWrite::NotActive(record.status),
        })
    }

    async fn force_timeouts(&self, id: Uuid, now: SystemTime) -> MongoResult<Option<MatchEntity>> {
        let Some(record) = self.find_match(id).await? else {
            return Ok(None);
        };
        if record.status != MatchStatus::InProgress {
            return Ok(Some(record));
        }

        let matches = self.matches().await;
        let timeout = MongoAnswerDocument::from(AnswerEntity::timeout(
            record.policy.duration_ms,
            now,
        ))
        .to_document();

        for (index, _) in record
            .participants
            .iter()
            .enumerate()
            .filter(|(_, participant)| !participant.is_decided())
        {
            let path = format!("participants.{index}.answer");
            let mut filter = doc! {
                "_id": key(id),
                "status": MatchStatus::InProgress.as_str(),
            };
            filter.insert(path.clone(), Bson::Null);
            let mut set = Document::new();
            set.insert(path, timeout.clone());

            matches
                .update_one(filter, doc! { "$set": set })
                .await
                .map_err(|source| MongoDaoError::SaveMatch { id, source })?;
        }

        self.find_match(id).await
    }

    async fn transition_match(
        &self,
        id: Uuid,
        transition: Transition,
        now: SystemTime,
    ) -> MongoResult<bool> {
        let now = DateTime::from_system_time(now);
        let mut set = doc! { "status": transition.to.as_str() };
        match transition.to {
            MatchStatus::Settling => {
                set.insert("settling_since", now);
            }
            MatchStatus::InProgress => {
                set.insert("settling_since", Bson::Null);
            }
            MatchStatus::Cancelled | MatchStatus::Completed => {
                set.insert("completed_at", now);
            }
            MatchStatus::Waiting => {}
        }

        let result = self
            .matches()
            .await
            .update_one(
                doc! { "_id": key(id), "status": transition.from.as_str() },
                doc! { "$set": set },
            )
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?;

        Ok(result.matched_count > 0)
    }

    async fn commit_settlement(&self, commit: SettlementCommit) -> MongoResult<bool> {
        let id = commit.match_id;
        let mut session = self.begin("committing a settlement").await?;

        let closed = self
            .matches()
            .await
            .find_one_and_update(
                doc! { "_id": key(id), "status": MatchStatus::Settling.as_str() },
                doc! {
                    "$set": {
                        "status": MatchStatus::Completed.as_str(),
                        "outcome": MongoOutcomeDocument::from(commit.outcome).to_document(),
                        "payout": signed(commit.payout),
                        "house_take": signed(commit.house_take),
                        "completed_at": DateTime::from_system_time(commit.completed_at),
                        "settling_since": Bson::Null,
                    }
                },
            )
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveMatch { id, source })?;

        if closed.is_none() {
            session
                .abort_transaction()
                .await
                .map_err(tx("committing a settlement"))?;
            return Ok(false);
        }

        let accounts = self.accounts().await;
        let ledger = self.ledger().await;
        let refunds = self.refunds().await;

        for entry in &commit.credits {
            if let Some((match_id, account_id)) = entry.refund_key() {
                let refund_key = refund_doc_id(match_id, account_id);
                let existing = refunds
                    .find_one(refund_key.clone())
                    .session(&mut session)
                    .await
                    .map_err(tx("committing a settlement"))?;
                if existing.is_some() {
                    continue;
                }
                refunds
                    .insert_one(refund_key)
                    .session(&mut session)
                    .await
                    .map_err(tx("committing a settlement"))?;
            }

            let credited = accounts
                .update_one(
                    doc_id(entry.account_id),
                    doc! { "$inc": { "balance": entry.amount } },
                )
                .session(&mut session)
                .await
                .map_err(|source| MongoDaoError::SaveAccount {
                    id: entry.account_id,
                    source,
                })?;
            if credited.matched_count == 0 {
                return Err(MongoDaoError::Corrupt {
                    collection: ACCOUNT_COLLECTION_NAME,
                    id: key(entry.account_id),
                    reason: format!("settlement of match `{id}` credits a missing account"),
                });
            }

            ledger
                .insert_one(MongoLedgerDocument::from(entry))
                .session(&mut session)
                .await
                .map_err(|source| MongoDaoError::SaveAccount {
                    id: entry.account_id,
                    source,
                })?;
        }

        for delta in &commit.stats {
            let document = accounts
                .find_one(doc_id(delta.account_id))
                .session(&mut session)
                .await
                .map_err(|source| MongoDaoError::LoadAccount {
                    id: delta.account_id,
                    source,
                })?
                .ok_or_else(|| MongoDaoError::Corrupt {
                    collection: ACCOUNT_COLLECTION_NAME,
                    id: key(delta.account_id),
                    reason: format!("settlement of match `{id}` references a missing account"),
                })?;

            let mut account = AccountEntity::try_from(document)?;
            account.apply_stats(delta);
            let update = MongoAccountDocument::from(account).stats_update();

            accounts
                .update_one(doc_id(delta.account_id), update)
                .session(&mut session)
                .await
                .map_err(|source| MongoDaoError::SaveAccount {
                    id: delta.account_id,
                    source,
                })?;
        }

        session
            .commit_transaction()
            .await
            .map_err(tx("committing a settlement"))?;
        Ok(true)
    }

    async fn insert_prompt(&self, prompt: PromptEntity) -> MongoResult<()> {
        let id = prompt.id;
        let document: MongoPromptDocument = prompt.into();
        self.prompts()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePrompt { id, source })?;
        Ok(())
    }

    async fn list_prompts(&self) -> MongoResult<Vec<PromptEntity>> {
        let documents: Vec<MongoPromptDocument> = self
            .prompts()
            .await
            .find(doc! {})
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|source| MongoDaoError::ListPrompts { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPrompts { source })?;

        documents.into_iter().map(PromptEntity::try_from).collect()
    }

    async fn set_prompt_active(&self, id: Uuid, active: bool) -> MongoResult<bool> {
        let result = self
            .prompts()
            .await
            .update_one(doc_id(id), doc! { "$set": { "active": active } })
            .await
            .map_err(|source| MongoDaoError::SavePrompt { id, source })?;
        Ok(result.matched_count > 0)
    }

    async fn random_active_prompt(&self) -> MongoResult<Option<PromptEntity>> {
        let pipeline = vec![
            doc! { "$match": { "active": true } },
            doc! { "$sample": { "size": 1 } },
        ];

        let mut cursor = self
            .prompts()
            .await
            .aggregate(pipeline)
            .with_type::<MongoPromptDocument>()
            .await
            .map_err(|source| MongoDaoError::ListPrompts { source })?;

        cursor
            .try_next()
            .await
            .map_err(|source| MongoDaoError::ListPrompts { source })?
            .map(PromptEntity::try_from)
            .transpose()
    }

    async fn record_match_analytics(&self, analytics: MatchAnalyticsEntity) -> MongoResult<()> {
        let id = analytics.match_id;
        let prompt_id = analytics.prompt_id;
        let correct_answers = i64::from(analytics.correct_answers);
        let collection = self.analytics().await;
        let mut session = self.begin("recording analytics").await?;

        let existing = collection
            .find_one(doc_id(id))
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAnalytics { id, source })?;
        if existing.is_some() {
            session
                .abort_transaction()
                .await
                .map_err(tx("recording analytics"))?;
            return Ok(());
        }

        collection
            .insert_one(MongoAnalyticsDocument::from(analytics))
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAnalytics { id, source })?;
        self.prompts()
            .await
            .update_one(
                doc_id(prompt_id),
                doc! { "$inc": { "times_played": 1_i64, "times_correct": correct_answers } },
            )
            .session(&mut session)
            .await
            .map_err(|source| MongoDaoError::SaveAnalytics { id, source })?;

        session
            .commit_transaction()
            .await
            .map_err(tx("recording analytics"))
    }
}

impl LedgerStore for MongoLedgerStore {
    fn insert_account(
        &self,
        account: AccountEntity,
        opening: Option<LedgerEntryEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert_account(account, opening)
                .await
                .map_err(Into::into)
        })
    }

    fn find_account(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<AccountEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_account(id).await.map_err(Into::into) })
    }

    fn list_ledger(
        &self,
        account_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<LedgerEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_ledger(account_id).await.map_err(Into::into) })
    }

    fn grant_free_credits(
        &self,
        account_id: Uuid,
        amount: u64,
        interval: Duration,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<GrantOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .grant_free_credits(account_id, amount, interval, now)
                .await
                .map_err(Into::into)
        })
    }

    fn reserve_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ReserveOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .reserve_stake(account_id, amount, match_id, now)
                .await
                .map_err(Into::into)
        })
    }

    fn release_stake(
        &self,
        account_id: Uuid,
        amount: u64,
        match_id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<ReleaseOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .release_stake(account_id, amount, match_id, now)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_match(&self, record: MatchEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_match(record).await.map_err(Into::into) })
    }

    fn find_match(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_match(id).await.map_err(Into::into) })
    }

    fn list_matches(
        &self,
        status: MatchStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_matches(status).await.map_err(Into::into) })
    }

    fn start_match(
        &self,
        id: Uuid,
        opponent: ParticipantEntity,
        prompt: MatchPromptEntity,
        started_at: SystemTime,
        deadline_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .start_match(id, opponent, prompt, started_at, deadline_at)
                .await
                .map_err(Into::into)
        })
    }

    fn record_answer(
        &self,
        id: Uuid,
        account_id: Uuid,
        answer: AnswerEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerWrite>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_answer(id, account_id, answer)
                .await
                .map_err(Into::into)
        })
    }

    fn force_timeouts(
        &self,
        id: Uuid,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<MatchEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.force_timeouts(id, now).await.map_err(Into::into) })
    }

    fn transition_match(
        &self,
        id: Uuid,
        transition: Transition,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .transition_match(id, transition, now)
                .await
                .map_err(Into::into)
        })
    }

    fn commit_settlement(
        &self,
        commit: SettlementCommit,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.commit_settlement(commit).await.map_err(Into::into) })
    }

    fn insert_prompt(&self, prompt: PromptEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_prompt(prompt).await.map_err(Into::into) })
    }

    fn list_prompts(&self) -> BoxFuture<'static, StorageResult<Vec<PromptEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_prompts().await.map_err(Into::into) })
    }

    fn set_prompt_active(
        &self,
        id: Uuid,
        active: bool,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.set_prompt_active(id, active).await.map_err(Into::into) })
    }

    fn random_active_prompt(&self) -> BoxFuture<'static, StorageResult<Option<PromptEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.random_active_prompt().await.map_err(Into::into) })
    }

    fn record_match_analytics(
        &self,
        analytics: MatchAnalyticsEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_match_analytics(analytics)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
