use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// Caller identity resolved from the `X-Account-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct AccountId(pub Uuid);

impl<S> FromRequestParts<S> for AccountId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACCOUNT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized("missing account header `X-Account-Id`".into())
            })?;

        Uuid::parse_str(raw.trim())
            .map(AccountId)
            .map_err(|_| AppError::Unauthorized("malformed account header `X-Account-Id`".into()))
    }
}
