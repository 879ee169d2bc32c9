// Error types for the agent runtime

use thiserror::Error;

use crate::state::AgentStatus;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while executing or persisting agent operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// LLM provider error (stream failure, missing model)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Message store error
    #[error("Message store error: {0}")]
    MessageStore(String),

    /// State store error (snapshot, history or metadata persistence)
    #[error("State store error: {0}")]
    StateStore(String),

    /// Event bus error
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Instruction not allowed from the current status
    #[error("Invalid transition: cannot execute {instruction} while operation is {status}")]
    InvalidTransition {
        instruction: &'static str,
        status: AgentStatus,
    },

    /// No state stored for the operation (never saved or expired)
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        RuntimeError::Llm(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        RuntimeError::ToolExecution(msg.into())
    }

    /// Create a message store error
    pub fn message_store(msg: impl Into<String>) -> Self {
        RuntimeError::MessageStore(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        RuntimeError::StateStore(msg.into())
    }

    /// Create an event bus error
    pub fn event_bus(msg: impl Into<String>) -> Self {
        RuntimeError::EventBus(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        RuntimeError::Configuration(msg.into())
    }

    /// Create an operation not found error
    pub fn operation_not_found(operation_id: impl Into<String>) -> Self {
        RuntimeError::OperationNotFound(operation_id.into())
    }

    /// Short machine-readable kind, used as the `errorType` of published error events
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Llm(_) => "llm_error",
            RuntimeError::ToolExecution(_) => "tool_error",
            RuntimeError::MessageStore(_) => "message_store_error",
            RuntimeError::StateStore(_) => "state_store_error",
            RuntimeError::EventBus(_) => "event_bus_error",
            RuntimeError::Configuration(_) => "configuration_error",
            RuntimeError::Serialization(_) => "serialization_error",
            RuntimeError::InvalidTransition { .. } => "invalid_transition",
            RuntimeError::OperationNotFound(_) => "operation_not_found",
            RuntimeError::Internal(_) => "internal_error",
        }
    }
}
