// Instructions and step context
//
// An instruction is produced by a driver outside this crate and describes
// what the next step does. The set is closed: executors match over it
// exhaustively, so a new instruction type is a compile error until handled.

use serde::{Deserialize, Serialize};

use crate::message::AgentMessage;
use crate::state::AgentStatus;
use crate::tool_types::{ChatToolPayload, ToolExecutionResult};
use crate::usage::Usage;

/// Payload of a `call_llm` instruction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLlmPayload {
    /// Messages sent to the model; the state's messages are used when empty
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    /// Pre-created assistant message to fill instead of creating a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
}

/// Payload of a `call_tool` instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolPayload {
    pub tool_calling: ChatToolPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

/// Payload of a `call_tools_batch` instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolsBatchPayload {
    pub tool_calling: Vec<ChatToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

/// Payload of a `resolve_aborted_tools` instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAbortedToolsPayload {
    /// Calls to abort; the state's pending calls are used when empty
    #[serde(default)]
    pub tool_calling: Vec<ChatToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

/// What the next step should do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentInstruction {
    CallLlm {
        payload: CallLlmPayload,
    },
    CallTool {
        payload: CallToolPayload,
    },
    CallToolsBatch {
        payload: CallToolsBatchPayload,
    },
    Finish {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_detail: Option<String>,
    },
    RequestHumanApprove {
        pending_tools_calling: Vec<ChatToolPayload>,
    },
    ResolveAbortedTools {
        payload: ResolveAbortedToolsPayload,
    },
}

impl AgentInstruction {
    /// The `type` tag of the instruction
    pub fn kind(&self) -> &'static str {
        match self {
            AgentInstruction::CallLlm { .. } => "call_llm",
            AgentInstruction::CallTool { .. } => "call_tool",
            AgentInstruction::CallToolsBatch { .. } => "call_tools_batch",
            AgentInstruction::Finish { .. } => "finish",
            AgentInstruction::RequestHumanApprove { .. } => "request_human_approve",
            AgentInstruction::ResolveAbortedTools { .. } => "resolve_aborted_tools",
        }
    }

    pub fn call_llm(payload: CallLlmPayload) -> Self {
        AgentInstruction::CallLlm { payload }
    }

    pub fn call_tool(tool_calling: ChatToolPayload, parent_message_id: Option<String>) -> Self {
        AgentInstruction::CallTool {
            payload: CallToolPayload {
                tool_calling,
                parent_message_id,
            },
        }
    }

    pub fn call_tools_batch(
        tool_calling: Vec<ChatToolPayload>,
        parent_message_id: Option<String>,
    ) -> Self {
        AgentInstruction::CallToolsBatch {
            payload: CallToolsBatchPayload {
                tool_calling,
                parent_message_id,
            },
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        AgentInstruction::Finish {
            reason: reason.into(),
            reason_detail: None,
        }
    }

    pub fn request_human_approve(pending_tools_calling: Vec<ChatToolPayload>) -> Self {
        AgentInstruction::RequestHumanApprove {
            pending_tools_calling,
        }
    }

    pub fn resolve_aborted_tools(
        tool_calling: Vec<ChatToolPayload>,
        parent_message_id: Option<String>,
    ) -> Self {
        AgentInstruction::ResolveAbortedTools {
            payload: ResolveAbortedToolsPayload {
                tool_calling,
                parent_message_id,
            },
        }
    }
}

// ============================================================================
// Next-step context
// ============================================================================

/// Phase that produced a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePhase {
    LlmResult,
    ToolResult,
    ToolsBatchResult,
}

/// One settled call of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchToolOutcome {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Phase-specific payload of a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhasePayload {
    #[serde(rename_all = "camelCase")]
    LlmResult {
        has_tools_calling: bool,
        tools_calling: Vec<ChatToolPayload>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call: ChatToolPayload,
        data: ToolExecutionResult,
        is_success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolsBatchResult {
        tool_count: usize,
        tool_results: Vec<BatchToolOutcome>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
}

/// Summary of the operation at the time a context was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub step_count: u32,
    pub status: AgentStatus,
    pub message_count: usize,
}

/// Payload for whichever instruction the driver issues next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContext {
    pub phase: RuntimePhase,
    pub payload: PhasePayload,
    pub session: SessionSnapshot,
    /// Usage delta produced by the step that built this context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_usage: Option<Usage>,
}

impl RuntimeContext {
    /// Parent id for chaining the next message, when the phase carries one
    pub fn parent_message_id(&self) -> Option<&str> {
        match &self.payload {
            PhasePayload::LlmResult {
                parent_message_id, ..
            }
            | PhasePayload::ToolResult {
                parent_message_id, ..
            }
            | PhasePayload::ToolsBatchResult {
                parent_message_id, ..
            } => parent_message_id.as_deref(),
        }
    }
}
