// Step runner
//
// Runs one step for a driver: load state, execute the step's instructions in
// order, bump stepCount once and persist the StepResult. It decides nothing
// about which instructions to run.

use anyhow::anyhow;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::coordinator::AgentRuntimeCoordinator;
use crate::error::{Result, RuntimeError};
use crate::executors::RuntimeExecutors;
use crate::instruction::AgentInstruction;
use crate::step::StepResult;

pub struct StepRunner {
    coordinator: Arc<AgentRuntimeCoordinator>,
    executors: Arc<RuntimeExecutors>,
}

impl StepRunner {
    pub fn new(coordinator: Arc<AgentRuntimeCoordinator>, executors: Arc<RuntimeExecutors>) -> Self {
        Self {
            coordinator,
            executors,
        }
    }

    pub fn coordinator(&self) -> &Arc<AgentRuntimeCoordinator> {
        &self.coordinator
    }

    /// Execute `instructions` as one step.
    ///
    /// All instructions share the step index. If any of them fails nothing is
    /// persisted and the stored state stays as it was.
    #[instrument(skip(self, instructions), fields(instruction_count = instructions.len()))]
    pub async fn run_step(
        &self,
        operation_id: &str,
        instructions: Vec<AgentInstruction>,
    ) -> Result<StepResult> {
        if instructions.is_empty() {
            return Err(RuntimeError::Internal(anyhow!(
                "A step needs at least one instruction"
            )));
        }

        let started = Instant::now();
        let mut state = self
            .coordinator
            .load_agent_state(operation_id)
            .await?
            .ok_or_else(|| RuntimeError::operation_not_found(operation_id))?;
        let step_index = state.step_count;

        let mut events = Vec::new();
        let mut next_context = None;
        for instruction in instructions {
            let result = self.executors.execute(instruction, state).await?;
            events.extend(result.events);
            next_context = result.next_context;
            state = result.new_state;
        }

        state.step_count += 1;
        let step = StepResult {
            step_index,
            new_state: state,
            next_context,
            execution_time: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            events,
        };

        self.coordinator.save_step_result(operation_id, &step).await?;

        info!(
            operation_id = %operation_id,
            step_index,
            status = %step.new_state.status,
            execution_time_ms = step.execution_time,
            "Step completed"
        );
        Ok(step)
    }
}
