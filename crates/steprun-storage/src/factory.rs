// Backend selection
//
// Builds the state store and event bus pair for the configured mode. Both
// halves always come from the same mode. Shared mode fails fast: a missing
// DATABASE_URL or an unreachable database is an error, never a silent
// fallback to in-process maps.

use std::sync::Arc;

use steprun_core::{
    AgentRuntimeCoordinator, EventBus, InMemoryEventBus, InMemoryStateStore, StateStore,
};
use tracing::info;

use crate::config::{BackendMode, RuntimeConfig};
use crate::error::{redact_url, BackendError};
use crate::event_bus::PostgresEventBus;
use crate::probe;
use crate::state_store::PostgresStateStore;

/// A state store and event bus built for one mode
#[derive(Clone)]
pub struct RuntimeBackends {
    pub state_store: Arc<dyn StateStore>,
    pub event_bus: Arc<dyn EventBus>,
    pub mode: BackendMode,
}

impl RuntimeBackends {
    /// Coordinator over these backends
    pub fn coordinator(&self) -> AgentRuntimeCoordinator {
        AgentRuntimeCoordinator::new(self.state_store.clone(), self.event_bus.clone())
    }
}

/// Create the backends selected by `config`
pub async fn create_backends(config: &RuntimeConfig) -> Result<RuntimeBackends, BackendError> {
    match config.mode {
        BackendMode::InProcess => {
            info!(
                history_cap = config.history_cap,
                stream_max_len = config.stream_max_len,
                "Using in-process agent runtime backends"
            );
            Ok(RuntimeBackends {
                state_store: Arc::new(InMemoryStateStore::with_limits(
                    config.state_store_limits(),
                )),
                event_bus: Arc::new(InMemoryEventBus::with_limits(config.event_bus_limits())),
                mode: BackendMode::InProcess,
            })
        }
        BackendMode::Shared => {
            let url = config.require_database_url()?;
            let pool = probe::connect(url, config.max_connections, config.probe_timeout).await?;
            crate::run_migrations(&pool).await?;

            info!(
                url = %redact_url(url),
                history_cap = config.history_cap,
                stream_max_len = config.stream_max_len,
                "Using shared PostgreSQL agent runtime backends"
            );
            Ok(RuntimeBackends {
                state_store: Arc::new(PostgresStateStore::new(
                    pool.clone(),
                    config.state_store_limits(),
                )),
                event_bus: Arc::new(PostgresEventBus::new(pool, config.event_bus_limits())),
                mode: BackendMode::Shared,
            })
        }
    }
}
