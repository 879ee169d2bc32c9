// Runtime coordinator
//
// Thin facade over one StateStore and one EventBus. It is the only place
// that looks at status transitions: `agent_runtime_end` is published when a
// save moves an operation from a non-terminal (or unknown) status into a
// terminal one.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::StreamEvent;
use crate::state::{
    AgentOperationMetadata, AgentState, AgentStatus, CreateOperationParams, OperationStats,
};
use crate::step::StepResult;
use crate::traits::{EventBus, StateStore};

pub struct AgentRuntimeCoordinator {
    state_store: Arc<dyn StateStore>,
    event_bus: Arc<dyn EventBus>,
}

impl AgentRuntimeCoordinator {
    pub fn new(state_store: Arc<dyn StateStore>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            state_store,
            event_bus,
        }
    }

    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.state_store
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.event_bus
    }

    /// Create metadata, store the initial state and publish `agent_runtime_init`
    pub async fn create_agent_operation(
        &self,
        initial_state: &AgentState,
        params: CreateOperationParams,
    ) -> Result<()> {
        let operation_id = initial_state.operation_id.as_str();
        self.state_store
            .create_operation_metadata(operation_id, params)
            .await?;
        self.state_store
            .save_agent_state(operation_id, initial_state)
            .await?;
        self.event_bus
            .publish_agent_runtime_init(operation_id, initial_state)
            .await?;

        info!(operation_id = %operation_id, "Created agent operation");
        Ok(())
    }

    pub async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> Result<()> {
        let previous = self.previous_status(operation_id).await;
        self.state_store.save_agent_state(operation_id, state).await?;
        self.publish_end_if_finished(operation_id, previous, state, state.step_count)
            .await;
        Ok(())
    }

    pub async fn load_agent_state(&self, operation_id: &str) -> Result<Option<AgentState>> {
        self.state_store.load_agent_state(operation_id).await
    }

    pub async fn save_step_result(&self, operation_id: &str, step: &StepResult) -> Result<()> {
        let previous = self.previous_status(operation_id).await;
        self.state_store.save_step_result(operation_id, step).await?;
        self.publish_end_if_finished(operation_id, previous, &step.new_state, step.step_index)
            .await;
        Ok(())
    }

    pub async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> Result<Vec<StepResult>> {
        self.state_store
            .get_execution_history(operation_id, limit)
            .await
    }

    pub async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> Result<Option<AgentOperationMetadata>> {
        self.state_store.get_operation_metadata(operation_id).await
    }

    pub async fn get_active_operations(&self) -> Result<Vec<String>> {
        self.state_store.get_active_operations().await
    }

    pub async fn get_stats(&self) -> Result<OperationStats> {
        self.state_store.get_stats().await
    }

    /// Newest first
    pub async fn get_stream_history(
        &self,
        operation_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEvent>> {
        self.event_bus.get_stream_history(operation_id, count).await
    }

    /// Drop expired operations and their event streams; returns the dropped ids
    pub async fn cleanup_expired_operations(&self) -> Result<Vec<String>> {
        let removed = self.state_store.cleanup_expired_operations().await?;
        for operation_id in &removed {
            if let Err(e) = self.event_bus.cleanup_operation(operation_id).await {
                warn!(operation_id = %operation_id, error = %e, "Failed to clean up event stream");
            }
        }
        match self.event_bus.purge_expired_streams().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired event streams"),
            Err(e) => warn!(error = %e, "Failed to purge expired event streams"),
        }
        Ok(removed)
    }

    pub async fn delete_agent_operation(&self, operation_id: &str) -> Result<()> {
        self.state_store.delete_agent_operation(operation_id).await?;
        if let Err(e) = self.event_bus.cleanup_operation(operation_id).await {
            warn!(operation_id = %operation_id, error = %e, "Failed to clean up event stream");
        }
        info!(operation_id = %operation_id, "Deleted agent operation");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let store = self.state_store.disconnect().await;
        let bus = self.event_bus.disconnect().await;
        store.and(bus)
    }

    /// Status currently stored for the operation; unknown on read failure
    async fn previous_status(&self, operation_id: &str) -> Option<AgentStatus> {
        match self.state_store.get_operation_metadata(operation_id).await {
            Ok(metadata) => metadata.map(|m| m.status),
            Err(e) => {
                warn!(operation_id = %operation_id, error = %e, "Failed to read previous status");
                None
            }
        }
    }

    async fn publish_end_if_finished(
        &self,
        operation_id: &str,
        previous: Option<AgentStatus>,
        state: &AgentState,
        step_index: u32,
    ) {
        let was_terminal = previous.is_some_and(|s| s.is_terminal());
        if was_terminal || !state.status.is_terminal() {
            return;
        }

        let reason = state.status.as_str();
        match self
            .event_bus
            .publish_agent_runtime_end(operation_id, step_index, state, Some(reason))
            .await
        {
            Ok(id) => debug!(operation_id = %operation_id, id = %id, "Published agent_runtime_end"),
            Err(e) => {
                error!(operation_id = %operation_id, error = %e, "Failed to publish agent_runtime_end")
            }
        }
    }
}
