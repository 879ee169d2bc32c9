// call_tool and call_tools_batch executors
//
// Both go through `run_tool_call`, which never fails: an executor error is
// published as an `error` event and reported in the outcome, so one failing
// call in a batch leaves its siblings alone. A single call also stores a tool
// message for the failure, with the error in `plugin_error`; a batch stores
// messages for completed calls only.

use futures::future::join_all;
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{begin_execution, message_params, message_scope, session_snapshot, RuntimeExecutors};
use crate::error::Result;
use crate::events::{RuntimeEvent, StreamEventInput, StreamEventType};
use crate::instruction::{
    BatchToolOutcome, CallToolPayload, CallToolsBatchPayload, PhasePayload, RuntimeContext,
    RuntimePhase,
};
use crate::message::{AgentMessage, MessageRole};
use crate::state::AgentState;
use crate::step::ExecutorResult;
use crate::tool_types::{ChatToolPayload, ToolExecutionContext, ToolExecutionResult};
use crate::usage::{accumulate_tool, Cost, Usage};

/// What happened to one tool call
struct ToolCallOutcome {
    payload: ChatToolPayload,
    /// `Err` holds the message of an executor failure
    result: std::result::Result<ToolExecutionResult, String>,
    execution_time: u64,
    /// Tool message as persisted, when creation succeeded
    message: Option<AgentMessage>,
    events: Vec<RuntimeEvent>,
}

impl ToolCallOutcome {
    fn success(&self) -> bool {
        matches!(&self.result, Ok(result) if result.success)
    }

    fn message_id(&self) -> Option<String> {
        self.message.as_ref().and_then(|m| m.id.clone())
    }

    /// Result handed to the next step; executor failures become a failed result
    fn data(&self) -> ToolExecutionResult {
        match &self.result {
            Ok(result) => result.clone(),
            Err(message) => ToolExecutionResult::failure(
                json!({ "type": "ToolExecutionError", "message": message }),
                self.execution_time,
            ),
        }
    }
}

/// Fold an outcome's usage into `usage`/`cost`
fn accumulate_outcome(
    usage: &Usage,
    cost: &Cost,
    outcome: &ToolCallOutcome,
    executors: &RuntimeExecutors,
) -> (Usage, Cost) {
    accumulate_tool(
        usage,
        cost,
        &outcome.payload.tool_key(),
        outcome.execution_time,
        outcome.success(),
        &executors.pricing,
    )
}

impl RuntimeExecutors {
    pub(super) async fn call_tool(
        &self,
        payload: CallToolPayload,
        mut state: AgentState,
    ) -> Result<ExecutorResult> {
        begin_execution(&mut state);

        let outcome = self
            .run_tool_call(&state, payload.tool_calling, payload.parent_message_id, true)
            .await;

        let (usage, cost) = accumulate_outcome(&state.usage, &state.cost, &outcome, self);
        let (step_usage, _) =
            accumulate_outcome(&Usage::default(), &Cost::default(), &outcome, self);
        state.usage = usage;
        state.cost = cost;

        let data = outcome.data();
        let is_success = outcome.success();
        let parent_message_id = outcome.message_id();
        let ToolCallOutcome {
            payload,
            message,
            events,
            ..
        } = outcome;

        if let Some(message) = message {
            state.messages.push(message);
        }

        let context = RuntimeContext {
            phase: RuntimePhase::ToolResult,
            payload: PhasePayload::ToolResult {
                tool_call: payload,
                data,
                is_success,
                parent_message_id,
            },
            session: session_snapshot(&state),
            step_usage: Some(step_usage),
        };

        Ok(ExecutorResult::new(state)
            .with_events(events)
            .with_context(context))
    }

    pub(super) async fn call_tools_batch(
        &self,
        payload: CallToolsBatchPayload,
        mut state: AgentState,
    ) -> Result<ExecutorResult> {
        begin_execution(&mut state);
        let operation_id = state.operation_id.clone();
        let tool_count = payload.tool_calling.len();

        let outcomes = join_all(
            payload
                .tool_calling
                .into_iter()
                .map(|call| {
                    self.run_tool_call(&state, call, payload.parent_message_id.clone(), false)
                }),
        )
        .await;

        let mut events = Vec::new();
        let mut tool_results = Vec::with_capacity(outcomes.len());
        let mut created_messages = Vec::new();
        let mut step_usage = Usage::default();

        for outcome in outcomes {
            let (usage, cost) = accumulate_outcome(&state.usage, &state.cost, &outcome, self);
            state.usage = usage;
            state.cost = cost;
            let (delta, _) = accumulate_outcome(&Usage::default(), &Cost::default(), &outcome, self);
            step_usage.merge(&delta);

            tool_results.push(BatchToolOutcome {
                tool_call_id: outcome.payload.id.clone(),
                result: outcome.result.as_ref().ok().cloned(),
                error: outcome.result.as_ref().err().cloned(),
                message_id: outcome.message_id(),
            });
            events.extend(outcome.events);
            if let Some(message) = outcome.message {
                created_messages.push(message);
            }
        }

        let parent_message_id = created_messages
            .iter()
            .rev()
            .find_map(|m| m.id.clone())
            .or(payload.parent_message_id);

        // Parallel writes may have landed in any order; take the store's view
        match self.message_store.query(&message_scope(&state)).await {
            Ok(messages) if !messages.is_empty() => state.messages = messages,
            Ok(_) => {
                warn!(
                    operation_id = %operation_id,
                    "Message store returned nothing after batch, appending created ones"
                );
                state.messages.extend(created_messages);
            }
            Err(e) => {
                warn!(
                    operation_id = %operation_id,
                    error = %e,
                    "Failed to re-read messages after batch, appending created ones"
                );
                state.messages.extend(created_messages);
            }
        }

        info!(
            operation_id = %operation_id,
            tool_count,
            succeeded = tool_results.iter().filter(|r| r.error.is_none()).count(),
            "Tool batch completed"
        );

        let context = RuntimeContext {
            phase: RuntimePhase::ToolsBatchResult,
            payload: PhasePayload::ToolsBatchResult {
                tool_count,
                tool_results,
                parent_message_id,
            },
            session: session_snapshot(&state),
            step_usage: Some(step_usage),
        };

        Ok(ExecutorResult::new(state)
            .with_events(events)
            .with_context(context))
    }

    /// Execute one call with its start/end events and tool message.
    /// `store_failure` also persists a tool message when the executor fails.
    async fn run_tool_call(
        &self,
        state: &AgentState,
        payload: ChatToolPayload,
        parent_message_id: Option<String>,
        store_failure: bool,
    ) -> ToolCallOutcome {
        let operation_id = state.operation_id.as_str();
        let step_index = state.step_count;
        let mut events = Vec::new();

        self.publish_best_effort(
            operation_id,
            StreamEventInput::new(
                StreamEventType::ToolStart,
                step_index,
                json!({
                    "toolCalling": payload,
                    "parentMessageId": parent_message_id,
                }),
            ),
        )
        .await;

        let context = ToolExecutionContext {
            tool_manifest_map: state.tool_manifest_map.clone(),
            tool_result_max_length: state
                .metadata
                .agent_config
                .as_ref()
                .and_then(|c| c.tool_result_max_length),
            topic_id: state.metadata.topic_id.clone(),
            user_id: self.user_id.clone(),
        };

        let started = Instant::now();
        let executed = self.tool_executor.execute_tool(&payload, &context).await;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match executed {
            Ok(result) => result,
            Err(e) => {
                error!(
                    operation_id = %operation_id,
                    tool_call_id = %payload.id,
                    tool = %payload.tool_key(),
                    error = %e,
                    "Tool execution failed"
                );
                self.publish_error(operation_id, step_index, &e, "tool_execution", Some(&payload.id))
                    .await;
                events.push(RuntimeEvent::Error {
                    error: e.to_string(),
                    phase: "tool_execution".to_string(),
                    tool_call_id: Some(payload.id.clone()),
                });
                let mut outcome = ToolCallOutcome {
                    payload,
                    result: Err(e.to_string()),
                    execution_time: elapsed,
                    message: None,
                    events,
                };
                if store_failure {
                    let failure = outcome.data();
                    let message = self
                        .create_tool_message(state, &outcome.payload, &failure, parent_message_id)
                        .await;
                    outcome.message = message;
                }
                return outcome;
            }
        };

        let execution_time = if result.execution_time > 0 {
            result.execution_time
        } else {
            elapsed
        };

        let message = self
            .create_tool_message(state, &payload, &result, parent_message_id)
            .await;

        self.publish_best_effort(
            operation_id,
            StreamEventInput::new(
                StreamEventType::ToolEnd,
                step_index,
                json!({
                    "toolCallId": payload.id,
                    "isSuccess": result.success,
                    "result": result,
                    "messageId": message.as_ref().and_then(|m| m.id.clone()),
                    "executionTime": execution_time,
                }),
            ),
        )
        .await;

        events.push(RuntimeEvent::ToolResult {
            id: payload.id.clone(),
            result: result.clone(),
        });

        ToolCallOutcome {
            payload,
            result: Ok(result),
            execution_time,
            message,
            events,
        }
    }

    /// Persist the tool message; failures are logged and yield `None`
    async fn create_tool_message(
        &self,
        state: &AgentState,
        payload: &ChatToolPayload,
        result: &ToolExecutionResult,
        parent_message_id: Option<String>,
    ) -> Option<AgentMessage> {
        let mut params = message_params(state, MessageRole::Tool);
        params.content = result.content.clone();
        params.parent_id = parent_message_id;
        params.tool_call_id = Some(payload.id.clone());
        params.plugin = Some(payload.clone());
        params.plugin_state = result.state.clone();
        params.plugin_error = result.error.clone();

        match self.message_store.create(params).await {
            Ok(created) => {
                let mut message = AgentMessage::tool(payload, result.content.clone()).with_id(created.id);
                message.plugin_state = result.state.clone();
                message.plugin_error = result.error.clone();
                Some(message)
            }
            Err(e) => {
                warn!(
                    operation_id = %state.operation_id,
                    tool_call_id = %payload.id,
                    error = %e,
                    "Failed to persist tool message, continuing"
                );
                None
            }
        }
    }
}
