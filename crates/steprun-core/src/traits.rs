// Core traits for pluggable backends and collaborators
//
// StateStore and EventBus each have an in-process implementation (memory.rs)
// and a PostgreSQL one (steprun-storage). Executors and the coordinator only
// ever see these traits, never a concrete backend.

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use crate::error::Result;
use crate::events::{StreamChunk, StreamEvent, StreamEventInput, StreamEventType};
use crate::llm::{ChatPayload, ChatStream};
use crate::message::{
    AgentMessage, CreateMessageParams, CreatedMessage, MessageQuery, UpdateMessageParams,
};
use crate::state::{AgentOperationMetadata, AgentState, CreateOperationParams, OperationStats};
use crate::step::StepResult;
use crate::tool_types::{ChatToolPayload, ToolExecutionContext, ToolExecutionResult};

/// Default number of steps returned by `get_execution_history`
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ============================================================================
// StateStore - Snapshot, step history and metadata per operation
// ============================================================================

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Initialize metadata with `idle` status and zeroed counters.
    /// Does not check for an existing record.
    async fn create_operation_metadata(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> Result<()>;

    /// Overwrite the latest snapshot and sync metadata from it
    async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> Result<()>;

    /// Latest snapshot; `None` when never saved or expired
    async fn load_agent_state(&self, operation_id: &str) -> Result<Option<AgentState>>;

    /// Write snapshot, history entry and metadata as one unit
    async fn save_step_result(&self, operation_id: &str, step: &StepResult) -> Result<()>;

    /// Up to `limit` most recent steps, earliest first
    async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> Result<Vec<StepResult>>;

    async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> Result<Option<AgentOperationMetadata>>;

    /// Ids of all operations that still have live metadata
    async fn get_active_operations(&self) -> Result<Vec<String>>;

    async fn get_stats(&self) -> Result<OperationStats>;

    /// Delete operations inactive past the backend's threshold; returns their ids
    async fn cleanup_expired_operations(&self) -> Result<Vec<String>>;

    /// Remove snapshot, history and metadata of an operation
    async fn delete_agent_operation(&self, operation_id: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

// ============================================================================
// EventBus - Ordered, bounded event stream per operation
// ============================================================================

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Append an event; returns its cursor id
    async fn publish_stream_event(
        &self,
        operation_id: &str,
        event: StreamEventInput,
    ) -> Result<String>;

    async fn publish_stream_chunk(
        &self,
        operation_id: &str,
        step_index: u32,
        chunk: &StreamChunk,
    ) -> Result<String> {
        let data = serde_json::to_value(chunk)?;
        self.publish_stream_event(
            operation_id,
            StreamEventInput::new(StreamEventType::StreamChunk, step_index, data),
        )
        .await
    }

    async fn publish_agent_runtime_init(
        &self,
        operation_id: &str,
        initial_state: &AgentState,
    ) -> Result<String> {
        let data = json!({
            "phase": "init",
            "initialState": serde_json::to_value(initial_state)?,
        });
        self.publish_stream_event(
            operation_id,
            StreamEventInput::new(
                StreamEventType::AgentRuntimeInit,
                initial_state.step_count,
                data,
            ),
        )
        .await
    }

    async fn publish_agent_runtime_end(
        &self,
        operation_id: &str,
        step_index: u32,
        final_state: &AgentState,
        reason: Option<&str>,
    ) -> Result<String> {
        let data = json!({
            "phase": "execution_complete",
            "operationId": operation_id,
            "reason": reason,
            "finalState": serde_json::to_value(final_state)?,
        });
        self.publish_stream_event(
            operation_id,
            StreamEventInput::new(StreamEventType::AgentRuntimeEnd, step_index, data),
        )
        .await
    }

    /// Tail the stream from `from_cursor` ("0" for the beginning), handing
    /// each new batch to `on_events` until `cancel` flips to true
    async fn subscribe_stream_events(
        &self,
        operation_id: &str,
        from_cursor: &str,
        on_events: &mut (dyn FnMut(Vec<StreamEvent>) + Send),
        cancel: watch::Receiver<bool>,
    ) -> Result<()>;

    /// Up to `count` most recent events, newest first
    async fn get_stream_history(&self, operation_id: &str, count: usize)
        -> Result<Vec<StreamEvent>>;

    async fn cleanup_operation(&self, operation_id: &str) -> Result<()>;

    /// Drop streams whose TTL lapsed; returns how many were dropped
    async fn purge_expired_streams(&self) -> Result<usize>;

    /// Number of operations with a live stream
    async fn get_active_operations_count(&self) -> Result<usize>;

    async fn disconnect(&self) -> Result<()>;
}

// ============================================================================
// MessageStore - Persisted chat messages
// ============================================================================

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, params: CreateMessageParams) -> Result<CreatedMessage>;

    async fn update(&self, id: &str, params: UpdateMessageParams) -> Result<()>;

    /// Messages in creation order, filtered by every coordinate that is set
    async fn query(&self, query: &MessageQuery) -> Result<Vec<AgentMessage>>;
}

// ============================================================================
// ChatModel - Streaming LLM calls
// ============================================================================

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streaming chat call
    async fn chat(&self, payload: ChatPayload, user_id: Option<&str>) -> Result<ChatStream>;
}

// ============================================================================
// ToolExecutor - Executing one resolved tool call
// ============================================================================

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a single tool call.
    ///
    /// A tool that ran and failed returns `Ok` with `success == false`; `Err`
    /// means the call could not be carried out at all.
    async fn execute_tool(
        &self,
        payload: &ChatToolPayload,
        context: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult>;
}
