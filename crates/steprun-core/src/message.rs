// Conversation message types
//
// AgentMessage is the in-state view of a conversation turn. The message
// store works with the same shape plus addressing fields (agent/thread/topic)
// so that a wholesale re-read after a batch tool step maps back directly.

use serde::{Deserialize, Serialize};

use crate::tool_types::ChatToolPayload;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Human intervention status recorded on tool messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    Approved,
    Rejected,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolIntervention {
    pub status: InterventionStatus,
}

/// One role-tagged conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls requested by an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatToolPayload>>,
    /// Id of the call a tool turn answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// The call a tool turn answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<ChatToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention: Option<ToolIntervention>,
}

impl AgentMessage {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            reasoning: None,
            tools: None,
            tool_call_id: None,
            plugin: None,
            plugin_state: None,
            plugin_error: None,
            intervention: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Create a tool result message answering `payload`
    pub fn tool(payload: &ChatToolPayload, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(MessageRole::Tool, content);
        message.tool_call_id = Some(payload.id.clone());
        message.plugin = Some(payload.clone());
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| !t.is_empty())
    }
}

/// Fields for creating a message in the message store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageParams {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<ChatToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention: Option<ToolIntervention>,
}

impl CreateMessageParams {
    pub fn new(role: MessageRole, agent_id: impl Into<String>) -> Self {
        Self {
            role,
            content: String::new(),
            agent_id: agent_id.into(),
            thread_id: None,
            topic_id: None,
            parent_id: None,
            model: None,
            provider: None,
            tool_call_id: None,
            plugin: None,
            plugin_state: None,
            plugin_error: None,
            intervention: None,
        }
    }
}

/// Partial update applied to a stored message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatToolPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_list: Option<Vec<serde_json::Value>>,
}

/// Scope of a message query
///
/// `thread_id` and `topic_id` match exactly: `None` selects only messages
/// stored without a thread (or topic), never every thread. `agent_id: None`
/// matches any agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

/// Identity of a created message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedMessage {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_message_links_call() {
        let payload = ChatToolPayload::new("call_9", "calc", "add", "{}");
        let message = AgentMessage::tool(&payload, "3");

        assert_eq!(message.role, MessageRole::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(message.plugin.as_ref().map(|p| p.api_name.as_str()), Some("add"));
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let payload = ChatToolPayload::new("call_1", "calc", "add", "{}");
        let mut message = AgentMessage::assistant("");
        message.tools = Some(vec![payload]);

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("toolCallId").is_none());
        assert_eq!(json["tools"][0]["apiName"], "add");
        assert!(message.has_tool_calls());
    }
}
