pub mod clock;
pub mod match_machine;
mod sse;

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::ledger_store::LedgerStore,
    error::ServiceError,
    services::{
        analytics::{AnalyticsJob, AnalyticsQueue},
        escrow::StakeEscrow,
    },
};

pub use self::clock::MatchClock;
pub use self::sse::SseHub;
use self::sse::SseState;

pub type SharedState = Arc<AppState>;

/// Receiving ends of the channels drained by the background workers.
pub struct WorkerChannels {
    /// Match ids whose answer window elapsed.
    pub deadlines: mpsc::UnboundedReceiver<Uuid>,
    /// Advisory analytics waiting to be written.
    pub analytics: mpsc::Receiver<AnalyticsJob>,
}

/// Central application state: storage handle, configuration, timers and notification hubs.
pub struct AppState {
    store: RwLock<Option<Arc<dyn LedgerStore>>>,
    config: AppConfig,
    sse: SseState,
    clock: MatchClock,
    escrow: StakeEscrow,
    analytics: AnalyticsQueue,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> (SharedState, WorkerChannels) {
        let (degraded_tx, _rx) = watch::channel(true);
        let (clock, deadlines) = MatchClock::new();
        let (analytics, analytics_rx) = AnalyticsQueue::new();

        let state = Arc::new(Self {
            store: RwLock::new(None),
            config,
            sse: SseState::new(64, 256),
            clock,
            escrow: StakeEscrow::new(),
            analytics,
            degraded: degraded_tx,
        });

        (
            state,
            WorkerChannels {
                deadlines,
                analytics: analytics_rx,
            },
        )
    }

    /// Obtain the storage backend, failing while the application is degraded.
    pub async fn store(&self) -> Result<Arc<dyn LedgerStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        let guard = self.store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a storage backend and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn LedgerStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Answer deadline timers.
    pub fn clock(&self) -> &MatchClock {
        &self.clock
    }

    /// Stake escrow and its outstanding refunds.
    pub fn escrow(&self) -> &StakeEscrow {
        &self.escrow
    }

    /// Queue feeding the analytics worker.
    pub fn analytics(&self) -> &AnalyticsQueue {
        &self.analytics
    }

    /// Broadcast hub used for the lobby SSE stream.
    pub fn lobby_sse(&self) -> &SseHub {
        self.sse.lobby()
    }

    /// Broadcast hub used for per-match SSE streams.
    pub fn match_sse(&self) -> &SseHub {
        self.sse.matches()
    }
}
