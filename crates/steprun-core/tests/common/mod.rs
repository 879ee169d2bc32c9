// Shared wiring for integration tests: in-memory backends, mocks, runner

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use steprun_core::{
    AgentMessage, AgentRuntimeCoordinator, AgentState, ChatToolPayload, CreateOperationParams,
    InMemoryEventBus, InMemoryMessageStore, InMemoryStateStore, MockChatModel, MockToolExecutor,
    RuntimeExecutors, ScriptedResponse, StepRunner, StreamEvent, StreamEventType, ToolManifest,
    ToolManifestMap,
};

pub struct Harness {
    pub store: InMemoryStateStore,
    pub bus: InMemoryEventBus,
    pub messages: InMemoryMessageStore,
    pub chat: MockChatModel,
    pub tools: MockToolExecutor,
    pub executors: Arc<RuntimeExecutors>,
    pub coordinator: Arc<AgentRuntimeCoordinator>,
    pub runner: StepRunner,
}

impl Harness {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self::with_tools(responses, MockToolExecutor::new())
    }

    pub fn with_tools(responses: Vec<ScriptedResponse>, tools: MockToolExecutor) -> Self {
        let store = InMemoryStateStore::new();
        let bus = InMemoryEventBus::new();
        let messages = InMemoryMessageStore::new();
        let chat = MockChatModel::new(responses);

        let executors = Arc::new(
            RuntimeExecutors::new(
                Arc::new(chat.clone()),
                Arc::new(tools.clone()),
                Arc::new(messages.clone()),
                Arc::new(bus.clone()),
            )
            .with_user_id("user-1")
            .with_flush_interval(Duration::from_millis(50)),
        );
        let coordinator = Arc::new(AgentRuntimeCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
        ));
        let runner = StepRunner::new(coordinator.clone(), executors.clone());

        Self {
            store,
            bus,
            messages,
            chat,
            tools,
            executors,
            coordinator,
            runner,
        }
    }

    /// Create the operation through the coordinator
    pub async fn create(&self, state: &AgentState) {
        self.coordinator
            .create_agent_operation(
                state,
                CreateOperationParams {
                    user_id: Some("user-1".into()),
                    ..CreateOperationParams::default()
                },
            )
            .await
            .unwrap();
    }

    pub async fn events_of_type(&self, operation_id: &str, event_type: StreamEventType) -> Vec<StreamEvent> {
        self.bus
            .events(operation_id)
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

/// Fresh state with a default model and a `calc` tool
pub fn agent_state(operation_id: &str) -> AgentState {
    let mut state = AgentState::new(operation_id, "agent-1")
        .with_model("gpt-test", "openai")
        .with_topic("topic-1")
        .with_message(AgentMessage::user("What is 1 + 2?"));

    let manifest = ToolManifest::new("calc")
        .with_api("add", "Add two numbers")
        .with_api("div", "Divide two numbers");
    state.tool_manifest_map = ToolManifestMap::from([("calc".to_string(), manifest)]);
    state.tools = Some(vec!["calc".to_string()]);
    state
}

pub fn calc_call(id: &str, api: &str) -> ChatToolPayload {
    let mut payload = ChatToolPayload::new(id, "calc", api, r#"{"a":1,"b":2}"#);
    payload.source = Some(steprun_core::ToolSource::Builtin);
    payload
}
