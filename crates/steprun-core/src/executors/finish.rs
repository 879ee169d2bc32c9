// finish executor

use serde_json::json;
use tracing::info;

use super::RuntimeExecutors;
use crate::error::Result;
use crate::events::{RuntimeEvent, StreamEventInput, StreamEventType};
use crate::state::{AgentState, AgentStatus};
use crate::step::ExecutorResult;

impl RuntimeExecutors {
    pub(super) async fn finish(
        &self,
        reason: String,
        reason_detail: Option<String>,
        mut state: AgentState,
    ) -> Result<ExecutorResult> {
        state.status = AgentStatus::Done;
        state.pending_tools_calling = None;
        state.touch();

        self.event_bus
            .publish_stream_event(
                &state.operation_id,
                StreamEventInput::new(
                    StreamEventType::StepComplete,
                    state.step_count,
                    json!({
                        "phase": "execution_complete",
                        "reason": reason,
                        "reasonDetail": reason_detail,
                        "finalState": state,
                    }),
                ),
            )
            .await?;

        info!(
            operation_id = %state.operation_id,
            reason = %reason,
            "Operation finished"
        );

        let events = vec![RuntimeEvent::Done {
            final_state: Box::new(state.clone()),
            reason,
            reason_detail,
        }];
        Ok(ExecutorResult::new(state).with_events(events))
    }
}
