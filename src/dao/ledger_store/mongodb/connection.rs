//! Client bootstrap and collection setup for the ledger backend.

use std::time::Duration;

use mongodb::{
    Client, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::time::sleep;
use tracing::{info, warn};

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{LEDGER_COLLECTION_NAME, MATCH_COLLECTION_NAME, PROMPT_COLLECTION_NAME},
};

const PING_ATTEMPTS: u32 = 10;
const FIRST_PING_DELAY: Duration = Duration::from_millis(250);
const MAX_PING_DELAY: Duration = Duration::from_secs(5);

/// Secondary index required by a ledger query.
struct LedgerIndex {
    collection: &'static str,
    name: &'static str,
    keys: Document,
}

fn ledger_indexes() -> [LedgerIndex; 4] {
    [
        // Account statements, newest first.
        LedgerIndex {
            collection: LEDGER_COLLECTION_NAME,
            name: "ledger_account_idx",
            keys: doc! { "account_id": 1, "created_at": -1 },
        },
        // Reconciliation of every movement of a match.
        LedgerIndex {
            collection: LEDGER_COLLECTION_NAME,
            name: "ledger_match_idx",
            keys: doc! { "match_id": 1 },
        },
        // Lobby listing and the sweeper's status scans.
        LedgerIndex {
            collection: MATCH_COLLECTION_NAME,
            name: "match_status_idx",
            keys: doc! { "status": 1, "created_at": -1 },
        },
        // Random draw among active prompts.
        LedgerIndex {
            collection: PROMPT_COLLECTION_NAME,
            name: "prompt_active_idx",
            keys: doc! { "active": 1 },
        },
    ]
}

/// Build a client for `config` and wait until the server answers a ping.
///
/// Pings are retried with a doubling delay capped at five seconds.
pub async fn establish_connection(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut attempt = 0;
    let mut delay = FIRST_PING_DELAY;
    loop {
        attempt += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                info!(database = %config.database_name, attempt, "connected to MongoDB");
                return Ok((client, database));
            }
            Err(source) if attempt >= PING_ATTEMPTS => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                warn!(
                    attempt,
                    wait_ms = delay.as_millis(),
                    error = %err,
                    "MongoDB ping failed during connection; retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_PING_DELAY);
            }
        }
    }
}

/// Create every secondary index the ledger queries rely on. Existing indexes are kept.
pub async fn ensure_ledger_indexes(database: &Database) -> MongoResult<()> {
    for index in ledger_indexes() {
        let model = IndexModel::builder()
            .keys(index.keys)
            .options(
                IndexOptions::builder()
                    .name(Some(index.name.to_owned()))
                    .build(),
            )
            .build();
        database
            .collection::<Document>(index.collection)
            .create_index(model)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: index.collection,
                index: index.name,
                source,
            })?;
    }
    Ok(())
}
