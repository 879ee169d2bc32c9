// Step results
//
// A StepResult is the atomic unit written to the step-history log. It bundles
// the state after the step, the context for the next instruction and the
// events the executors returned.

use serde::{Deserialize, Serialize};

use crate::events::RuntimeEvent;
use crate::instruction::RuntimeContext;
use crate::state::AgentState;

/// What one executor call produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorResult {
    pub events: Vec<RuntimeEvent>,
    pub new_state: AgentState,
    /// Absent when the operation reached a terminal or waiting state
    pub next_context: Option<RuntimeContext>,
}

impl ExecutorResult {
    pub fn new(new_state: AgentState) -> Self {
        Self {
            events: Vec::new(),
            new_state,
            next_context: None,
        }
    }

    pub fn with_events(mut self, events: Vec<RuntimeEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_context(mut self, context: RuntimeContext) -> Self {
        self.next_context = Some(context);
        self
    }
}

/// One completed step, as persisted in the history log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_index: u32,
    pub new_state: AgentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_context: Option<RuntimeContext>,
    /// Wall-clock duration of the step in milliseconds
    pub execution_time: u64,
    #[serde(default)]
    pub events: Vec<RuntimeEvent>,
}

impl StepResult {
    pub fn operation_id(&self) -> &str {
        &self.new_state.operation_id
    }
}
