/// Ledger, match and prompt persistence behind a single transactional seam.
pub mod ledger_store;
/// Entities persisted by the storage layer and shared across layers.
pub mod models;
/// Storage abstraction layer errors.
pub mod storage;
