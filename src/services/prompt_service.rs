use std::time::SystemTime;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::PromptEntity,
    dto::prompt::{CreatePromptRequest, PromptSummary},
    error::ServiceError,
    state::SharedState,
};

/// Add a prompt to the catalog.
pub async fn add_prompt(
    state: &SharedState,
    payload: CreatePromptRequest,
) -> Result<PromptSummary, ServiceError> {
    let store = state.store().await?;
    let prompt = PromptEntity {
        id: Uuid::new_v4(),
        title: payload.title.trim().to_string(),
        artist: payload.artist.trim().to_string(),
        lyrics_snippet: payload.lyrics_snippet,
        answer: payload.answer.trim().to_string(),
        active: payload.active.unwrap_or(true),
        times_played: 0,
        times_correct: 0,
        created_at: SystemTime::now(),
    };

    store.insert_prompt(prompt.clone()).await?;
    info!(prompt_id = %prompt.id, title = %prompt.title, "prompt added");
    Ok(prompt.into())
}

/// Enable or disable a prompt for future matches. Running matches keep their snapshot.
pub async fn set_prompt_active(
    state: &SharedState,
    prompt_id: Uuid,
    active: bool,
) -> Result<(), ServiceError> {
    let store = state.store().await?;
    if !store.set_prompt_active(prompt_id, active).await? {
        return Err(ServiceError::NotFound(format!(
            "prompt `{prompt_id}` not found"
        )));
    }
    info!(prompt_id = %prompt_id, active, "prompt availability changed");
    Ok(())
}

/// Every catalog prompt, answers included.
pub async fn list_prompts(state: &SharedState) -> Result<Vec<PromptSummary>, ServiceError> {
    let store = state.store().await?;
    let prompts = store.list_prompts().await?;
    Ok(prompts.into_iter().map(PromptSummary::from).collect())
}

/// Insert the configured seed prompts when the catalog is empty. Returns how many were added.
pub async fn seed_catalog(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.store().await?;
    if !store.list_prompts().await?.is_empty() {
        return Ok(0);
    }

    let seeds = state.config().seed_prompts();
    if seeds.is_empty() {
        warn!("prompt catalog is empty and no seed prompts are configured");
        return Ok(0);
    }

    let now = SystemTime::now();
    for seed in seeds {
        store
            .insert_prompt(PromptEntity {
                id: Uuid::new_v4(),
                title: seed.title.clone(),
                artist: seed.artist.clone(),
                lyrics_snippet: seed.lyrics_snippet.clone(),
                answer: seed.answer.clone(),
                active: true,
                times_played: 0,
                times_correct: 0,
                created_at: now,
            })
            .await?;
    }

    info!(count = seeds.len(), "seeded prompt catalog");
    Ok(seeds.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::test_support::memory_state};

    #[tokio::test]
    async fn seeding_only_fills_an_empty_catalog() {
        let (state, _store, _channels) = memory_state(AppConfig::default()).await;
        let expected = state.config().seed_prompts().len();

        assert_eq!(seed_catalog(&state).await.unwrap(), expected);
        assert_eq!(seed_catalog(&state).await.unwrap(), 0);
        assert_eq!(list_prompts(&state).await.unwrap().len(), expected);
    }

    #[tokio::test]
    async fn prompts_can_be_added_and_disabled() {
        let (state, _store, _channels) = memory_state(AppConfig::default()).await;
        let added = add_prompt(
            &state,
            CreatePromptRequest {
                title: " Auld Lang Syne ".into(),
                artist: "Robert Burns".into(),
                lyrics_snippet: "Should auld ____ be forgot".into(),
                answer: "acquaintance".into(),
                active: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(added.title, "Auld Lang Syne");
        assert!(added.active);

        set_prompt_active(&state, added.id, false).await.unwrap();
        let prompts = list_prompts(&state).await.unwrap();
        assert!(!prompts[0].active);

        let err = set_prompt_active(&state, Uuid::new_v4(), true).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
