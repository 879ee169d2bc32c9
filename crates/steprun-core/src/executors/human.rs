// Human-in-the-loop executors: request_human_approve and resolve_aborted_tools

use serde_json::json;
use tracing::{info, warn};

use super::{message_params, RuntimeExecutors};
use crate::error::Result;
use crate::events::{RuntimeEvent, StreamChunk, StreamEventInput, StreamEventType};
use crate::instruction::ResolveAbortedToolsPayload;
use crate::message::{AgentMessage, InterventionStatus, MessageRole, ToolIntervention};
use crate::state::{AgentState, AgentStatus};
use crate::step::ExecutorResult;
use crate::tool_types::ChatToolPayload;

/// Content of the tool message recorded for an aborted call
pub const ABORTED_TOOL_CONTENT: &str = "Tool execution was aborted by user.";

/// Termination reason of `resolve_aborted_tools`
pub const USER_ABORTED_REASON: &str = "user_aborted";

impl RuntimeExecutors {
    /// Pause for approval. Returns no next context: the driver waits for an
    /// external decision.
    pub(super) async fn request_human_approve(
        &self,
        pending_tools_calling: Vec<ChatToolPayload>,
        mut state: AgentState,
    ) -> Result<ExecutorResult> {
        let operation_id = state.operation_id.clone();
        let step_index = state.step_count;

        state.status = AgentStatus::WaitingForHuman;
        state.pending_tools_calling = Some(pending_tools_calling.clone());
        state.touch();

        self.event_bus
            .publish_stream_event(
                &operation_id,
                StreamEventInput::new(
                    StreamEventType::StepStart,
                    step_index,
                    json!({
                        "phase": "human_approval",
                        "pendingToolsCalling": pending_tools_calling,
                        "requiresApproval": true,
                    }),
                ),
            )
            .await?;
        self.event_bus
            .publish_stream_chunk(
                &operation_id,
                step_index,
                &StreamChunk::tools_calling(pending_tools_calling.clone()),
            )
            .await?;

        info!(
            operation_id = %operation_id,
            pending = pending_tools_calling.len(),
            "Waiting for human approval"
        );

        let events = vec![
            RuntimeEvent::HumanApproveRequired {
                pending_tools_calling: pending_tools_calling.clone(),
                session_id: operation_id,
            },
            RuntimeEvent::ToolPending {
                tool_calls: pending_tools_calling,
            },
        ];
        Ok(ExecutorResult::new(state).with_events(events))
    }

    /// Record every pending call as aborted and end the operation
    pub(super) async fn resolve_aborted_tools(
        &self,
        payload: ResolveAbortedToolsPayload,
        mut state: AgentState,
    ) -> Result<ExecutorResult> {
        let operation_id = state.operation_id.clone();
        let calls = if payload.tool_calling.is_empty() {
            state.pending_tools_calling.clone().unwrap_or_default()
        } else {
            payload.tool_calling
        };

        for call in &calls {
            let intervention = ToolIntervention {
                status: InterventionStatus::Aborted,
            };

            let mut params = message_params(&state, MessageRole::Tool);
            params.content = ABORTED_TOOL_CONTENT.to_string();
            params.parent_id = payload.parent_message_id.clone();
            params.tool_call_id = Some(call.id.clone());
            params.plugin = Some(call.clone());
            params.intervention = Some(intervention.clone());

            let mut message = AgentMessage::tool(call, ABORTED_TOOL_CONTENT);
            message.intervention = Some(intervention);

            match self.message_store.create(params).await {
                Ok(created) => message.id = Some(created.id),
                Err(e) => warn!(
                    operation_id = %operation_id,
                    tool_call_id = %call.id,
                    error = %e,
                    "Failed to persist aborted tool message, continuing"
                ),
            }
            state.messages.push(message);
        }

        state.status = AgentStatus::Done;
        state.pending_tools_calling = None;
        state.touch();

        let reason_detail = "User aborted operation with pending tool calls".to_string();
        self.event_bus
            .publish_stream_event(
                &operation_id,
                StreamEventInput::new(
                    StreamEventType::StepComplete,
                    state.step_count,
                    json!({
                        "phase": "execution_complete",
                        "reason": USER_ABORTED_REASON,
                        "reasonDetail": reason_detail,
                        "finalState": state,
                    }),
                ),
            )
            .await?;

        info!(
            operation_id = %operation_id,
            aborted = calls.len(),
            "Aborted pending tool calls"
        );

        let events = vec![RuntimeEvent::Done {
            final_state: Box::new(state.clone()),
            reason: USER_ABORTED_REASON.to_string(),
            reason_detail: Some(reason_detail),
        }];
        Ok(ExecutorResult::new(state).with_events(events))
    }
}
