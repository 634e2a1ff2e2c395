/// Account, balance and free credits operations.
pub mod account_service;
/// Advisory match analytics queue and worker.
pub mod analytics;
/// OpenAPI documentation generation.
pub mod documentation;
/// Stake reservation and idempotent refunds.
pub mod escrow;
/// Health check service.
pub mod health_service;
/// Answer correctness and winner resolution.
pub mod judge;
/// Match lifecycle and deadline handling.
pub mod match_service;
/// Periodic recovery of expired, overdue and stuck matches.
pub mod match_sweeper;
/// Admin prompt catalog management.
pub mod prompt_service;
/// Exactly-once match settlement.
pub mod settlement;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
