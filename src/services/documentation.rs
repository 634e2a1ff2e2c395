use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Lyric Duel backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::lobby_stream,
        crate::routes::sse::match_stream,
        crate::routes::accounts::open_account,
        crate::routes::accounts::get_account,
        crate::routes::accounts::list_ledger,
        crate::routes::accounts::claim_free_credits,
        crate::routes::matches::list_open_matches,
        crate::routes::matches::create_match,
        crate::routes::matches::get_match,
        crate::routes::matches::join_match,
        crate::routes::matches::submit_answer,
        crate::routes::matches::cancel_match,
        crate::routes::prompts::list_prompts,
        crate::routes::prompts::add_prompt,
        crate::routes::prompts::set_prompt_active,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::account::OpenAccountRequest,
            crate::dto::account::AccountView,
            crate::dto::account::LedgerEntryView,
            crate::dto::account::FreeCreditsResponse,
            crate::dto::matches::CreateMatchRequest,
            crate::dto::matches::SubmitAnswerRequest,
            crate::dto::matches::AnswerAck,
            crate::dto::matches::MatchView,
            crate::dto::matches::ParticipantView,
            crate::dto::matches::PromptView,
            crate::dto::matches::OutcomeKind,
            crate::dto::prompt::CreatePromptRequest,
            crate::dto::prompt::SetPromptActiveRequest,
            crate::dto::prompt::PromptSummary,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::MatchChangedEvent,
            crate::dto::sse::AnswerRecordedEvent,
            crate::state::match_machine::MatchStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "accounts", description = "Accounts, balances and free credits"),
        (name = "matches", description = "Wagered lyric duels"),
        (name = "admin", description = "Prompt catalog management"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_match_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/matches",
            "/matches/{id}",
            "/matches/{id}/join",
            "/matches/{id}/answer",
            "/matches/{id}/cancel",
            "/sse/matches/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
