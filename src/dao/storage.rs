use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
///
/// Every variant is a "try again later" condition from the caller's point of view. An
/// `Unavailable` write may still have been applied when the connection dropped after the
/// backend committed it, so callers re-read before compensating.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or aborted the transaction.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A persisted record no longer satisfies the shape the service relies on.
    #[error("corrupted record: {message}")]
    Corrupted { message: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corruption error for a record that violates a stored invariant.
    pub fn corrupted(message: impl Into<String>) -> Self {
        StorageError::Corrupted {
            message: message.into(),
        }
    }
}
