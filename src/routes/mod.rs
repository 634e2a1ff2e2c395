use axum::Router;

use crate::state::SharedState;

pub mod accounts;
pub mod docs;
pub mod extract;
pub mod health;
pub mod matches;
pub mod prompts;
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState, admin_token: prompts::AdminToken) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(accounts::router())
        .merge(matches::router())
        .merge(prompts::router(admin_token));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, state::test_support::memory_state};

    async fn app() -> (Router<()>, crate::state::WorkerChannels) {
        let (state, _store, channels) = memory_state(AppConfig::default()).await;
        crate::services::prompt_service::seed_catalog(&state).await.unwrap();
        let token = prompts::AdminToken::new(Some("secret".into()));
        (router(state, token), channels)
    }

    async fn call(
        app: &Router<()>,
        method: &str,
        uri: &str,
        account: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(account) = account {
            builder = builder.header("X-Account-Id", account);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn match_flow_over_http() {
        let (app, _channels) = app().await;

        let (status, alice) =
            call(&app, "POST", "/accounts", None, Some(json!({"username": "alice"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let alice = alice["id"].as_str().unwrap().to_string();
        let (_, bob) = call(&app, "POST", "/accounts", None, Some(json!({"username": "bob"}))).await;
        let bob = bob["id"].as_str().unwrap().to_string();

        let (status, created) =
            call(&app, "POST", "/matches", Some(&alice), Some(json!({"stake": 100}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let match_uri = format!("/matches/{}", created["id"].as_str().unwrap());

        let (status, started) =
            call(&app, "POST", &format!("{match_uri}/join"), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["status"], "in_progress");
        assert!(started["prompt"].get("answer").is_none());

        let (status, _) = call(
            &app,
            "POST",
            &format!("{match_uri}/answer"),
            Some(&alice),
            Some(json!({"answer": "definitely wrong"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(
            &app,
            "POST",
            &format!("{match_uri}/answer"),
            Some(&alice),
            Some(json!({"answer": "again"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["message"].as_str().unwrap().contains("already"));
    }

    #[tokio::test]
    async fn http_errors_follow_the_domain_taxonomy() {
        let (app, _channels) = app().await;
        let (_, poor) = call(&app, "POST", "/accounts", None, Some(json!({"username": "poor"}))).await;
        let poor = poor["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "POST", "/matches", None, Some(json!({"stake": 100}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            call(&app, "POST", "/matches", Some(&poor), Some(json!({"stake": 5_000}))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        let (status, _) = call(
            &app,
            "GET",
            &format!("/matches/{}", uuid::Uuid::new_v4()),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/admin/prompts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
