use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Active deadline timers.
    pub armed_timers: usize,
    /// Refunds waiting to be retried.
    pub outstanding_refunds: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(armed_timers: usize, outstanding_refunds: usize) -> Self {
        Self {
            status: "ok".to_string(),
            armed_timers,
            outstanding_refunds,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(armed_timers: usize, outstanding_refunds: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            armed_timers,
            outstanding_refunds,
        }
    }
}
