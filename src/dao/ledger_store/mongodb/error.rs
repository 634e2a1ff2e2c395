use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("transaction failed while {operation}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to write account `{id}`")]
    SaveAccount {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load account `{id}`")]
    LoadAccount {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list ledger of account `{id}`")]
    ListLedger {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write match `{id}`")]
    SaveMatch {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load match `{id}`")]
    LoadMatch {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list matches")]
    ListMatches {
        #[source]
        source: MongoError,
    },
    #[error("failed to write prompt `{id}`")]
    SavePrompt {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list prompts")]
    ListPrompts {
        #[source]
        source: MongoError,
    },
    #[error("failed to record analytics for match `{id}`")]
    SaveAnalytics {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("amount {amount} does not fit in a stored balance")]
    AmountOutOfRange { amount: u64 },
    #[error("corrupt document `{id}` in `{collection}`: {reason}")]
    Corrupt {
        collection: &'static str,
        id: String,
        reason: String,
    },
}
