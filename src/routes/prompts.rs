use std::{env, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, put},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::prompt::{CreatePromptRequest, PromptSummary, SetPromptActiveRequest},
    error::AppError,
    services::prompt_service,
    state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const ADMIN_TOKEN_ENV: &str = "ADMIN_TOKEN";

/// Token expected in `X-Admin-Token`; `None` disables every admin route.
#[derive(Clone)]
pub struct AdminToken(Option<Arc<str>>);

impl AdminToken {
    /// Read the expected token from `ADMIN_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(env::var(ADMIN_TOKEN_ENV).ok().filter(|token| !token.is_empty()))
    }

    /// Use an explicit token.
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(Arc::from))
    }
}

/// Admin-only prompt catalog endpoints.
pub fn router(token: AdminToken) -> Router<SharedState> {
    Router::new()
        .route("/admin/prompts", get(list_prompts).post(add_prompt))
        .route("/admin/prompts/{id}/active", put(set_prompt_active))
        .route_layer(middleware::from_fn_with_state(token, require_admin_token))
}

/// List every catalog prompt, answers included.
#[utoipa::path(
    get,
    path = "/admin/prompts",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    responses((status = 200, description = "Prompt catalog", body = [PromptSummary]))
)]
pub async fn list_prompts(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PromptSummary>>, AppError> {
    Ok(Json(prompt_service::list_prompts(&state).await?))
}

/// Add a prompt to the catalog.
#[utoipa::path(
    post,
    path = "/admin/prompts",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN")),
    request_body = CreatePromptRequest,
    responses((status = 201, description = "Prompt added", body = PromptSummary))
)]
pub async fn add_prompt(
    State(state): State<SharedState>,
    Json(payload): Json<CreatePromptRequest>,
) -> Result<(StatusCode, Json<PromptSummary>), AppError> {
    payload.validate()?;
    let prompt = prompt_service::add_prompt(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

/// Enable or disable a prompt for future matches.
#[utoipa::path(
    put,
    path = "/admin/prompts/{id}/active",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Admin token configured through ADMIN_TOKEN"),
    ("id" = String, Path, description = "Identifier of the prompt")),
    request_body = SetPromptActiveRequest,
    responses((status = 204, description = "Prompt updated"))
)]
pub async fn set_prompt_active(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetPromptActiveRequest>,
) -> Result<StatusCode, AppError> {
    prompt_service::set_prompt_active(&state, id, payload.active).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_admin_token(
    State(token): State<AdminToken>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    match token.0.as_deref() {
        Some(expected) if expected == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid admin token".into())),
        None => Err(AppError::Forbidden("admin token not configured".into())),
    }
}
