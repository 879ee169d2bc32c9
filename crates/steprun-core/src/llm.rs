// LLM chat capability types
//
// The chat model is an opaque streaming capability: the executor hands it a
// payload and drains the returned stream until it ends. Provider adapters
// live outside this crate.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::message::AgentMessage;
use crate::tool_types::RawToolCall;
use crate::usage::ModelUsage;

/// Type alias for the chat response stream
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent>> + Send>>;

/// Function definition offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// `identifier____api_name[____type]`, see [`crate::tool_names`]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Request sent to the chat model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub messages: Vec<AgentMessage>,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub tools: Vec<ToolFunction>,
}

/// Deltas and reports produced while a chat call streams
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    /// Text delta
    Text(String),
    /// Reasoning delta
    Thinking(String),
    /// Tool calls requested so far; each event carries the full list
    ToolsCalling(Vec<RawToolCall>),
    /// Grounding / search metadata
    Grounding(serde_json::Value),
    /// Inline generated image
    Base64Image(serde_json::Value),
    /// Final usage report
    Completion(ModelUsage),
}
