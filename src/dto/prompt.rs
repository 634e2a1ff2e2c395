//! DTOs for the admin prompt catalog endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::PromptEntity,
    dto::{format_system_time, validation::validate_not_blank},
};

/// Payload used to add a lyric prompt to the catalog.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreatePromptRequest {
    #[validate(length(max = 200), custom(function = "validate_not_blank"))]
    pub title: String,
    #[validate(length(max = 200), custom(function = "validate_not_blank"))]
    pub artist: String,
    #[validate(length(max = 1000), custom(function = "validate_not_blank"))]
    pub lyrics_snippet: String,
    #[validate(length(max = 200), custom(function = "validate_not_blank"))]
    pub answer: String,
    /// Defaults to `true`.
    #[serde(default)]
    pub active: Option<bool>,
}

/// Toggle whether a prompt may be drawn for new matches.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPromptActiveRequest {
    pub active: bool,
}

/// Full catalog entry, answer included, for administrators.
#[derive(Debug, Serialize, ToSchema)]
pub struct PromptSummary {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub lyrics_snippet: String,
    pub answer: String,
    pub active: bool,
    pub times_played: u32,
    pub times_correct: u32,
    pub created_at: String,
}

impl From<PromptEntity> for PromptSummary {
    fn from(value: PromptEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            artist: value.artist,
            lyrics_snippet: value.lyrics_snippet,
            answer: value.answer,
            active: value.active,
            times_played: value.times_played,
            times_correct: value.times_correct,
            created_at: format_system_time(value.created_at),
        }
    }
}
