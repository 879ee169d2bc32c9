// Agent Runtime Core
//
// Durable, streamable step execution for AI agent operations: alternating LLM
// calls and tool invocations, with human approval of pending tool calls.
//
// Key design decisions:
// - StateStore and EventBus are traits with an in-process implementation here
//   and a PostgreSQL one in steprun-storage; nothing branches on the backend
// - AgentState is passed by value through executors, so a failed step never
//   leaks partial state to the caller
// - AgentInstruction is a closed enum and RuntimeExecutors::execute matches it
//   exhaustively
// - Streamed LLM text is buffered and flushed on an interval by a state
//   machine local to each call
// - Usage and cost accumulate through field-wise addition only

// Runtime types
pub mod events;
pub mod instruction;
pub mod llm;
pub mod message;
pub mod state;
pub mod step;
pub mod tool_types;
pub mod usage;

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executors;
pub mod runner;
pub mod tool_names;
pub mod traits;

// In-memory implementations for single-node deployments and testing
pub mod memory;

// Re-exports for convenience
pub use config::{EventBusLimits, StateStoreLimits};
pub use coordinator::AgentRuntimeCoordinator;
pub use error::{Result, RuntimeError};
pub use events::{
    RuntimeEvent, StreamChunk, StreamChunkType, StreamEvent, StreamEventInput, StreamEventType,
};
pub use executors::{
    RuntimeExecutors, ABORTED_TOOL_CONTENT, DEFAULT_FLUSH_INTERVAL, USER_ABORTED_REASON,
};
pub use instruction::{
    AgentInstruction, CallLlmPayload, CallToolPayload, CallToolsBatchPayload, PhasePayload,
    ResolveAbortedToolsPayload, RuntimeContext, RuntimePhase,
};
pub use llm::{ChatPayload, ChatStream, ChatStreamEvent, ToolFunction};
pub use message::{AgentMessage, InterventionStatus, MessageRole};
pub use runner::StepRunner;
pub use state::{
    AgentOperationMetadata, AgentState, AgentStatus, CreateOperationParams, ModelRuntimeConfig,
    OperationStats,
};
pub use step::{ExecutorResult, StepResult};
pub use tool_types::{
    ChatToolPayload, RawToolCall, ToolExecutionContext, ToolExecutionResult, ToolManifest,
    ToolManifestMap, ToolSource, ToolSourceMap, ToolType,
};
pub use traits::{ChatModel, EventBus, MessageStore, StateStore, ToolExecutor};
pub use usage::{Cost, ModelUsage, ToolPricing, Usage};

pub use memory::{
    InMemoryEventBus, InMemoryMessageStore, InMemoryStateStore, MockChatModel, MockToolExecutor,
    ScriptedResponse,
};
