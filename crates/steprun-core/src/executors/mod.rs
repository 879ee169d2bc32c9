// Runtime executors
//
// One async function per instruction type. Each takes the current state by
// value, performs its side effects (LLM stream, tool calls, message writes,
// event publishing) and returns the new state plus the context for the next
// instruction. `execute` is the single dispatch point: a total match over
// AgentInstruction.

mod call_llm;
mod call_tool;
mod finish;
mod human;

pub use human::{ABORTED_TOOL_CONTENT, USER_ABORTED_REASON};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, RuntimeError};
use crate::events::{StreamEventInput, StreamEventType};
use crate::instruction::{AgentInstruction, SessionSnapshot};
use crate::message::{CreateMessageParams, MessageQuery, MessageRole};
use crate::state::{AgentState, AgentStatus};
use crate::step::ExecutorResult;
use crate::traits::{ChatModel, EventBus, MessageStore, ToolExecutor};
use crate::usage::ToolPricing;

/// Default interval at which streamed text and reasoning are flushed
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Executors with their injected collaborators
pub struct RuntimeExecutors {
    chat_model: Arc<dyn ChatModel>,
    tool_executor: Arc<dyn ToolExecutor>,
    message_store: Arc<dyn MessageStore>,
    event_bus: Arc<dyn EventBus>,
    pricing: ToolPricing,
    user_id: Option<String>,
    flush_interval: Duration,
}

impl RuntimeExecutors {
    pub fn new(
        chat_model: Arc<dyn ChatModel>,
        tool_executor: Arc<dyn ToolExecutor>,
        message_store: Arc<dyn MessageStore>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            chat_model,
            tool_executor,
            message_store,
            event_bus,
            pricing: ToolPricing::default(),
            user_id: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_pricing(mut self, pricing: ToolPricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// User on whose behalf LLM and tool calls are made
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Execute one instruction against `state`.
    ///
    /// Terminal states are rejected before any side effect. On error the
    /// caller still holds its own copy of the state, untouched.
    pub async fn execute(
        &self,
        instruction: AgentInstruction,
        state: AgentState,
    ) -> Result<ExecutorResult> {
        if state.status.is_terminal() {
            return Err(RuntimeError::InvalidTransition {
                instruction: instruction.kind(),
                status: state.status,
            });
        }

        match instruction {
            AgentInstruction::CallLlm { payload } => self.call_llm(payload, state).await,
            AgentInstruction::CallTool { payload } => self.call_tool(payload, state).await,
            AgentInstruction::CallToolsBatch { payload } => {
                self.call_tools_batch(payload, state).await
            }
            AgentInstruction::Finish {
                reason,
                reason_detail,
            } => self.finish(reason, reason_detail, state).await,
            AgentInstruction::RequestHumanApprove {
                pending_tools_calling,
            } => self.request_human_approve(pending_tools_calling, state).await,
            AgentInstruction::ResolveAbortedTools { payload } => {
                self.resolve_aborted_tools(payload, state).await
            }
        }
    }

    /// Publish an event, logging instead of failing
    async fn publish_best_effort(&self, operation_id: &str, event: StreamEventInput) {
        let event_type = event.event_type;
        if let Err(e) = self.event_bus.publish_stream_event(operation_id, event).await {
            warn!(
                operation_id = %operation_id,
                event_type = %event_type,
                error = %e,
                "Failed to publish stream event"
            );
        }
    }

    /// Publish an `error` stream event for a failure
    async fn publish_error(
        &self,
        operation_id: &str,
        step_index: u32,
        error: &RuntimeError,
        phase: &str,
        tool_call_id: Option<&str>,
    ) {
        let data = json!({
            "error": error.to_string(),
            "errorType": error.kind(),
            "phase": phase,
            "toolCallId": tool_call_id,
        });
        self.publish_best_effort(
            operation_id,
            StreamEventInput::new(StreamEventType::Error, step_index, data),
        )
        .await;
    }
}

/// Move the state into `running` for an LLM or tool instruction.
/// Executing from `waiting_for_human` means the pending calls were approved.
fn begin_execution(state: &mut AgentState) {
    if state.status == AgentStatus::WaitingForHuman {
        state.pending_tools_calling = None;
    }
    state.mark_running();
}

/// Message params stamped with the state's addressing coordinates
fn message_params(state: &AgentState, role: MessageRole) -> CreateMessageParams {
    let mut params = CreateMessageParams::new(role, state.metadata.agent_id.clone());
    params.thread_id = state.metadata.thread_id.clone();
    params.topic_id = state.metadata.topic_id.clone();
    params
}

fn message_scope(state: &AgentState) -> MessageQuery {
    MessageQuery {
        agent_id: Some(state.metadata.agent_id.clone()),
        thread_id: state.metadata.thread_id.clone(),
        topic_id: state.metadata.topic_id.clone(),
    }
}

fn session_snapshot(state: &AgentState) -> SessionSnapshot {
    SessionSnapshot {
        session_id: state.operation_id.clone(),
        step_count: state.step_count,
        status: state.status,
        message_count: state.messages.len(),
    }
}
