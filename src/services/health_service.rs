use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness plus the size of the in-memory recovery queues, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let armed = state.clock().armed_count();
    let outstanding = state.escrow().outstanding();
    if state.is_degraded() {
        HealthResponse::degraded(armed, outstanding)
    } else {
        HealthResponse::ok(armed, outstanding)
    }
}
