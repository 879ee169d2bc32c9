// End-to-end step scenarios through StepRunner and the coordinator

mod common;

use common::{agent_state, calc_call, Harness};
use steprun_core::{
    AgentInstruction, AgentStatus, CallLlmPayload, InterventionStatus, MessageRole, RuntimeError,
    RuntimeEvent, ScriptedResponse, StreamEventType, ABORTED_TOOL_CONTENT, USER_ABORTED_REASON,
};

#[tokio::test]
async fn test_reply_and_finish_in_one_step() {
    let h = Harness::new(vec![ScriptedResponse::reply("Hi")]);
    h.create(&agent_state("op-1")).await;

    let step = h
        .runner
        .run_step(
            "op-1",
            vec![
                AgentInstruction::call_llm(CallLlmPayload::default()),
                AgentInstruction::finish("completed"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(step.step_index, 0);
    assert_eq!(step.new_state.status, AgentStatus::Done);
    assert_eq!(step.new_state.step_count, 1);
    assert!(step.next_context.is_none());
    assert!(step
        .events
        .iter()
        .any(|e| matches!(e, RuntimeEvent::Done { reason, .. } if reason == "completed")));

    let stored = h.coordinator.load_agent_state("op-1").await.unwrap().unwrap();
    assert_eq!(stored, step.new_state);
    assert_eq!(stored.messages.last().unwrap().content, "Hi");

    let history = h.coordinator.get_execution_history("op-1", 50).await.unwrap();
    assert_eq!(history.len(), 1);

    let metadata = h.coordinator.get_operation_metadata("op-1").await.unwrap().unwrap();
    assert_eq!(metadata.status, AgentStatus::Done);
    assert_eq!(metadata.total_steps, 1);
    assert_eq!(metadata.total_cost, stored.cost.total);
    assert_eq!(metadata.user_id.as_deref(), Some("user-1"));

    let init = h.events_of_type("op-1", StreamEventType::AgentRuntimeInit).await;
    assert_eq!(init.len(), 1);
    let end = h.events_of_type("op-1", StreamEventType::AgentRuntimeEnd).await;
    assert_eq!(end.len(), 1);
    assert_eq!(end[0].data["reason"], "done");
    assert_eq!(end[0].data["finalState"]["status"], "done");
}

#[tokio::test]
async fn test_tool_call_then_approval_pause() {
    let h = Harness::new(vec![]);
    h.create(&agent_state("op-1")).await;

    let first = h
        .runner
        .run_step(
            "op-1",
            vec![AgentInstruction::call_tool(calc_call("call_1", "add"), None)],
        )
        .await
        .unwrap();
    assert_eq!(first.new_state.status, AgentStatus::Running);
    assert!(first.next_context.is_some());

    let pending = vec![calc_call("call_2", "div")];
    let second = h
        .runner
        .run_step(
            "op-1",
            vec![AgentInstruction::request_human_approve(pending.clone())],
        )
        .await
        .unwrap();

    assert_eq!(second.step_index, 1);
    assert_eq!(second.new_state.status, AgentStatus::WaitingForHuman);
    assert_eq!(second.new_state.pending_tools_calling, Some(pending));
    assert!(second.next_context.is_none());

    let metadata = h.coordinator.get_operation_metadata("op-1").await.unwrap().unwrap();
    assert_eq!(metadata.status, AgentStatus::WaitingForHuman);
    assert_eq!(metadata.total_steps, 2);
    assert!(h
        .events_of_type("op-1", StreamEventType::AgentRuntimeEnd)
        .await
        .is_empty());

    let stats = h.coordinator.get_stats().await.unwrap();
    assert_eq!(stats.active, 1);
}

#[tokio::test]
async fn test_abort_pending_tools_ends_operation() {
    let h = Harness::new(vec![]);
    let mut state = agent_state("op-1");
    state.status = AgentStatus::WaitingForHuman;
    state.pending_tools_calling = Some(vec![calc_call("call_1", "add"), calc_call("call_2", "div")]);
    h.create(&state).await;

    let step = h
        .runner
        .run_step(
            "op-1",
            vec![AgentInstruction::resolve_aborted_tools(
                vec![],
                Some("assistant-1".into()),
            )],
        )
        .await
        .unwrap();

    let stored = h.messages.messages().await;
    assert_eq!(stored.len(), 2);
    for (message, call_id) in stored.iter().zip(["call_1", "call_2"]) {
        assert_eq!(message.role, MessageRole::Tool);
        assert_eq!(message.content, ABORTED_TOOL_CONTENT);
        assert_eq!(message.tool_call_id.as_deref(), Some(call_id));
        assert_eq!(
            message.intervention.as_ref().map(|i| i.status),
            Some(InterventionStatus::Aborted)
        );
    }

    assert_eq!(step.new_state.status, AgentStatus::Done);
    assert!(step.new_state.pending_tools_calling.is_none());

    let done: Vec<_> = step
        .events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::Done { reason, .. } => Some(reason.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(done, vec![USER_ABORTED_REASON]);

    let complete = h.events_of_type("op-1", StreamEventType::StepComplete).await;
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].data["reason"], USER_ABORTED_REASON);
}

#[tokio::test]
async fn test_runtime_end_published_once() {
    let h = Harness::new(vec![]);
    h.create(&agent_state("op-1")).await;

    h.runner
        .run_step("op-1", vec![AgentInstruction::finish("completed")])
        .await
        .unwrap();

    // Re-saving a terminal state does not announce the end again
    let state = h.coordinator.load_agent_state("op-1").await.unwrap().unwrap();
    h.coordinator.save_agent_state("op-1", &state).await.unwrap();

    let err = h
        .runner
        .run_step("op-1", vec![AgentInstruction::finish("again")])
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidTransition { .. }));

    let end = h.events_of_type("op-1", StreamEventType::AgentRuntimeEnd).await;
    assert_eq!(end.len(), 1);
}

#[tokio::test]
async fn test_failed_step_leaves_stored_state_untouched() {
    let h = Harness::new(vec![ScriptedResponse::new().text("par").fail("upstream closed")]);
    let initial = agent_state("op-1");
    h.create(&initial).await;

    let err = h
        .runner
        .run_step(
            "op-1",
            vec![AgentInstruction::call_llm(CallLlmPayload::default())],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Llm(_)));

    let stored = h.coordinator.load_agent_state("op-1").await.unwrap().unwrap();
    assert_eq!(stored, initial);
    assert!(h
        .coordinator
        .get_execution_history("op-1", 50)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(h.events_of_type("op-1", StreamEventType::Error).await.len(), 1);
}

#[tokio::test]
async fn test_run_step_rejects_unknown_operation_and_empty_steps() {
    let h = Harness::new(vec![]);

    let err = h
        .runner
        .run_step("missing", vec![AgentInstruction::finish("completed")])
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::OperationNotFound(id) if id == "missing"));

    h.create(&agent_state("op-1")).await;
    let err = h.runner.run_step("op-1", vec![]).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Internal(_)));
}

#[tokio::test]
async fn test_llm_then_batch_across_steps() {
    let response = ScriptedResponse::new()
        .tools_calling(vec![
            steprun_core::RawToolCall::new("call_a", "calc____add", "{}"),
            steprun_core::RawToolCall::new("call_b", "calc____div", "{}"),
        ])
        .completion(steprun_core::ModelUsage::new(8, 4));
    let h = Harness::new(vec![response]);
    h.create(&agent_state("op-1")).await;

    let first = h
        .runner
        .run_step(
            "op-1",
            vec![AgentInstruction::call_llm(CallLlmPayload::default())],
        )
        .await
        .unwrap();

    let (calls, parent) = match first.next_context.map(|c| c.payload) {
        Some(steprun_core::PhasePayload::LlmResult {
            tools_calling,
            parent_message_id,
            ..
        }) => (tools_calling, parent_message_id),
        other => panic!("unexpected context: {other:?}"),
    };
    assert_eq!(calls.len(), 2);

    let second = h
        .runner
        .run_step(
            "op-1",
            vec![AgentInstruction::call_tools_batch(calls, parent)],
        )
        .await
        .unwrap();

    // Assistant message plus both tool messages, as re-read from the store
    let roles: Vec<_> = second.new_state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::Assistant, MessageRole::Tool, MessageRole::Tool]
    );
    assert_eq!(second.new_state.step_count, 2);
    assert_eq!(second.new_state.usage.llm.api_calls, 1);
    assert_eq!(second.new_state.usage.tools.total_calls, 2);

    let history = h.coordinator.get_execution_history("op-1", 50).await.unwrap();
    let indexes: Vec<_> = history.iter().map(|s| s.step_index).collect();
    assert_eq!(indexes, vec![0, 1]);
}
