// Stream and runtime events
//
// StreamEvent is the outbound contract read by the transport layer: a closed
// type enum plus a JSON payload. RuntimeEvent is what executors return in a
// StepResult for the driver; it is never published as-is.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::state::AgentState;
use crate::tool_types::{ChatToolPayload, ToolExecutionResult};

// ============================================================================
// Stream events (published on the EventBus)
// ============================================================================

/// Type of a published stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    AgentRuntimeInit,
    AgentRuntimeEnd,
    StreamStart,
    StreamChunk,
    StreamEnd,
    ToolStart,
    ToolEnd,
    StepStart,
    StepComplete,
    Error,
}

impl StreamEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventType::AgentRuntimeInit => "agent_runtime_init",
            StreamEventType::AgentRuntimeEnd => "agent_runtime_end",
            StreamEventType::StreamStart => "stream_start",
            StreamEventType::StreamChunk => "stream_chunk",
            StreamEventType::StreamEnd => "stream_end",
            StreamEventType::ToolStart => "tool_start",
            StreamEventType::ToolEnd => "tool_end",
            StreamEventType::StepStart => "step_start",
            StreamEventType::StepComplete => "step_complete",
            StreamEventType::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "agent_runtime_init" => Some(StreamEventType::AgentRuntimeInit),
            "agent_runtime_end" => Some(StreamEventType::AgentRuntimeEnd),
            "stream_start" => Some(StreamEventType::StreamStart),
            "stream_chunk" => Some(StreamEventType::StreamChunk),
            "stream_end" => Some(StreamEventType::StreamEnd),
            "tool_start" => Some(StreamEventType::ToolStart),
            "tool_end" => Some(StreamEventType::ToolEnd),
            "step_start" => Some(StreamEventType::StepStart),
            "step_complete" => Some(StreamEventType::StepComplete),
            "error" => Some(StreamEventType::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-type of a `stream_chunk` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkType {
    Text,
    Reasoning,
    ToolsCalling,
    Image,
    Grounding,
    Base64Image,
    ContentPart,
    ReasoningPart,
}

/// An event as stored on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub operation_id: String,
    pub step_index: u32,
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub data: serde_json::Value,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Cursor assigned by the bus at publish time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StreamEvent {
    /// Cursor as a number; cursors are decimal sequence numbers on every backend
    pub fn cursor(&self) -> Option<u64> {
        self.id.as_deref().and_then(|id| id.parse().ok())
    }
}

/// Parse a subscription cursor; `"0"` reads from the beginning
pub fn parse_cursor(cursor: &str) -> Result<u64> {
    cursor
        .parse()
        .map_err(|_| RuntimeError::event_bus(format!("Invalid stream cursor: {cursor}")))
}

/// An event to publish; the bus fills in operation id, timestamp and cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventInput {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub step_index: u32,
    pub data: serde_json::Value,
}

impl StreamEventInput {
    pub fn new(event_type: StreamEventType, step_index: u32, data: serde_json::Value) -> Self {
        Self {
            event_type,
            step_index,
            data,
        }
    }

    /// Stamp the input into a stored event
    pub fn into_event(self, operation_id: &str, id: Option<String>) -> StreamEvent {
        StreamEvent {
            operation_id: operation_id.to_string(),
            step_index: self.step_index,
            event_type: self.event_type,
            data: self.data,
            timestamp: Utc::now().timestamp_millis(),
            id,
        }
    }
}

/// A `stream_chunk` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub chunk_type: StreamChunkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_calling: Option<Vec<ChatToolPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<serde_json::Value>,
}

impl StreamChunk {
    fn empty(chunk_type: StreamChunkType) -> Self {
        Self {
            chunk_type,
            content: None,
            reasoning: None,
            tools_calling: None,
            grounding: None,
            image: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        let mut chunk = Self::empty(StreamChunkType::Text);
        chunk.content = Some(content.into());
        chunk
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        let mut chunk = Self::empty(StreamChunkType::Reasoning);
        chunk.reasoning = Some(reasoning.into());
        chunk
    }

    pub fn tools_calling(tools: Vec<ChatToolPayload>) -> Self {
        let mut chunk = Self::empty(StreamChunkType::ToolsCalling);
        chunk.tools_calling = Some(tools);
        chunk
    }

    pub fn grounding(grounding: serde_json::Value) -> Self {
        let mut chunk = Self::empty(StreamChunkType::Grounding);
        chunk.grounding = Some(grounding);
        chunk
    }

    pub fn base64_image(image: serde_json::Value) -> Self {
        let mut chunk = Self::empty(StreamChunkType::Base64Image);
        chunk.image = Some(image);
        chunk
    }
}

// ============================================================================
// Runtime events (returned to the driver in a StepResult)
// ============================================================================

/// Events returned by executors alongside the new state.
/// Tags are snake_case; fields are camelCase like the rest of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RuntimeEvent {
    /// An LLM call started
    LlmStart {
        model: String,
        provider: String,
        message_count: usize,
    },
    /// A flushed chunk of streamed output
    LlmStream { chunk: StreamChunk },
    /// The LLM call completed
    LlmResult {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        tool_calls: Vec<ChatToolPayload>,
    },
    /// A tool call produced a result
    ToolResult {
        id: String,
        result: ToolExecutionResult,
    },
    /// A failure that did not abort the step, or the failure that did
    Error {
        error: String,
        phase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
    /// The operation reached `done`
    Done {
        final_state: Box<AgentState>,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason_detail: Option<String>,
    },
    /// Execution paused for human approval
    HumanApproveRequired {
        pending_tools_calling: Vec<ChatToolPayload>,
        session_id: String,
    },
    /// Tool calls waiting for a decision
    ToolPending { tool_calls: Vec<ChatToolPayload> },
}

impl RuntimeEvent {
    /// The `type` tag of the event
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeEvent::LlmStart { .. } => "llm_start",
            RuntimeEvent::LlmStream { .. } => "llm_stream",
            RuntimeEvent::LlmResult { .. } => "llm_result",
            RuntimeEvent::ToolResult { .. } => "tool_result",
            RuntimeEvent::Error { .. } => "error",
            RuntimeEvent::Done { .. } => "done",
            RuntimeEvent::HumanApproveRequired { .. } => "human_approve_required",
            RuntimeEvent::ToolPending { .. } => "tool_pending",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_event_wire_shape() {
        let event = StreamEventInput::new(
            StreamEventType::StreamChunk,
            2,
            serde_json::to_value(StreamChunk::text("hi")).unwrap(),
        )
        .into_event("op-1", Some("7".to_string()));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operationId"], "op-1");
        assert_eq!(json["stepIndex"], 2);
        assert_eq!(json["type"], "stream_chunk");
        assert_eq!(json["data"], json!({"chunkType": "text", "content": "hi"}));
        assert_eq!(event.cursor(), Some(7));
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor("0").unwrap(), 0);
        assert_eq!(parse_cursor("42").unwrap(), 42);
        assert!(parse_cursor("1-0").is_err());
    }

    #[test]
    fn test_event_type_parse_matches_serde() {
        let json = serde_json::to_value(StreamEventType::AgentRuntimeEnd).unwrap();
        assert_eq!(json, StreamEventType::AgentRuntimeEnd.as_str());
        assert_eq!(
            StreamEventType::parse("tool_end"),
            Some(StreamEventType::ToolEnd)
        );
        assert_eq!(StreamEventType::parse("bogus"), None);
    }

    #[test]
    fn test_runtime_event_tag() {
        let event = RuntimeEvent::Error {
            error: "boom".into(),
            phase: "tool_execution".into(),
            tool_call_id: Some("call_1".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["toolCallId"], "call_1");
        assert!(json.get("tool_call_id").is_none());
        assert_eq!(event.kind(), "error");
    }

    #[test]
    fn test_runtime_event_fields_are_camel_case() {
        let event = RuntimeEvent::HumanApproveRequired {
            pending_tools_calling: vec![],
            session_id: "session-1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "human_approve_required");
        assert_eq!(json["sessionId"], "session-1");
        assert!(json["pendingToolsCalling"].is_array());

        let start: RuntimeEvent = serde_json::from_value(serde_json::json!({
            "type": "llm_start",
            "model": "gpt-test",
            "provider": "openai",
            "messageCount": 3,
        }))
        .unwrap();
        assert!(matches!(start, RuntimeEvent::LlmStart { message_count: 3, .. }));

        let done = RuntimeEvent::Done {
            final_state: Box::new(AgentState::new("op-1", "agent-1")),
            reason: "completed".into(),
            reason_detail: Some("no tool calls".into()),
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["finalState"]["operationId"], "op-1");
        assert_eq!(json["reasonDetail"], "no tool calls");
    }
}
