// Shared agent runtime backends on PostgreSQL
//
// This crate provides database implementations for the runtime traits:
// - PostgresStateStore: implements StateStore (snapshots, step history, metadata)
// - PostgresEventBus: implements EventBus (capped, TTL-bound event streams)
//
// create_backends picks between these and the in-process implementations
// from steprun-core based on RuntimeConfig.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod factory;
pub mod probe;
pub mod state_store;

pub use config::{BackendMode, RuntimeConfig};
pub use error::BackendError;
pub use event_bus::PostgresEventBus;
pub use factory::{create_backends, RuntimeBackends};
pub use probe::is_backend_available;
pub use state_store::PostgresStateStore;

use sqlx::PgPool;

/// Apply the schema in ./migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), BackendError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
