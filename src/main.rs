//! Lyric Duel backend entrypoint wiring REST, SSE, background workers and the ledger store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lyric_duel_back::{
    config::AppConfig,
    dao::ledger_store::memory::MemoryLedgerStore,
    routes::{self, prompts::AdminToken},
    services::{analytics, match_service, match_sweeper, prompt_service},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let (app_state, channels) = AppState::new(config);

    tokio::spawn(match_service::run_deadline_worker(
        app_state.clone(),
        channels.deadlines,
    ));
    tokio::spawn(analytics::run_worker(app_state.clone(), channels.analytics));
    tokio::spawn(match_sweeper::run(app_state.clone()));

    start_storage(&app_state).await?;

    let admin_token = AdminToken::from_env();
    let app = build_router(app_state, admin_token);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the backend selected by `STORE_BACKEND` (`mongo` by default when compiled in).
async fn start_storage(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| default_backend().into());

    match backend.as_str() {
        "memory" => {
            warn!("using the in-memory ledger store; balances are lost on restart");
            state.set_store(Arc::new(MemoryLedgerStore::new())).await;
            seed_prompts(state).await;
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use lyric_duel_back::{
                dao::{
                    ledger_store::{
                        LedgerStore,
                        mongodb::{MongoConfig, MongoLedgerStore},
                    },
                    storage::StorageError,
                },
                services::storage_supervisor,
            };

            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = MongoConfig::from_env().await.map_err(StorageError::from)?;
                let store = MongoLedgerStore::connect(config)
                    .await
                    .map_err(StorageError::from)?;
                Ok(Arc::new(store) as Arc<dyn LedgerStore>)
            }));
            let seeding_state = state.clone();
            tokio::spawn(async move { seed_prompts(&seeding_state).await });
        }
        other => bail!("unsupported STORE_BACKEND `{other}`"),
    }

    Ok(())
}

fn default_backend() -> &'static str {
    if cfg!(feature = "mongo-store") {
        "mongo"
    } else {
        "memory"
    }
}

async fn seed_prompts(state: &SharedState) {
    // Wait until the store is installed so seeding does not race degraded mode.
    let mut degraded = state.degraded_watcher();
    if degraded.wait_for(|value| !*value).await.is_err() {
        return;
    }
    match prompt_service::seed_catalog(state).await {
        Ok(0) => {}
        Ok(count) => info!(count, "prompt catalog seeded"),
        Err(err) => warn!(error = %err, "failed to seed prompt catalog"),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState, admin_token: AdminToken) -> Router<()> {
    routes::router(state, admin_token)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
