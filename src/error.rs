use std::time::SystemTime;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    dto::format_system_time,
    state::match_machine::{InvalidTransition, MatchStatus},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable; the operation can be retried.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Missing or unknown caller identity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Caller is known but may not perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The balance does not cover the stake.
    #[error("insufficient funds: a stake of {required} credits is not covered")]
    InsufficientFunds {
        /// Stake that was requested.
        required: u64,
    },
    /// No match with this identifier.
    #[error("match not found")]
    MatchNotFound,
    /// The match already has two participants.
    #[error("match is full")]
    MatchFull,
    /// The match does not accept this operation in its current status.
    #[error("match is not active (status: {})", .0.as_str())]
    MatchNotActive(MatchStatus),
    /// The participant already submitted an answer.
    #[error("answer already submitted")]
    AlreadyAnswered,
    /// Free credits were claimed too recently.
    #[error("free credits already claimed; next claim at {}", format_system_time(*.next_claim_at))]
    ClaimTooEarly {
        /// Earliest time the next claim succeeds.
        next_claim_at: SystemTime,
    },
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The account cannot cover the requested amount.
    #[error("payment required: {0}")]
    PaymentRequired(String),
    /// Authenticated caller lacks the right to act.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Rate-limited operation invoked too early.
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(StorageError::Corrupted { message }) => {
                AppError::Internal(message)
            }
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::Forbidden(message) => AppError::Forbidden(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::InsufficientFunds { .. } => AppError::PaymentRequired(message),
            ServiceError::MatchNotFound => AppError::NotFound(message),
            ServiceError::MatchFull
            | ServiceError::MatchNotActive(_)
            | ServiceError::AlreadyAnswered => AppError::Conflict(message),
            ServiceError::ClaimTooEarly { .. } => AppError::TooManyRequests(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn domain_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(ServiceError::InsufficientFunds { required: 100 }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(status_of(ServiceError::MatchNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::MatchFull), StatusCode::CONFLICT);
        assert_eq!(status_of(ServiceError::AlreadyAnswered), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ServiceError::MatchNotActive(MatchStatus::Completed)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ServiceError::ClaimTooEarly {
                next_claim_at: SystemTime::UNIX_EPOCH
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn corrupted_records_are_internal_errors() {
        let err = ServiceError::Unavailable(StorageError::corrupted("bad balance"));
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
