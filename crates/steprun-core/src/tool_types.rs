// Tool types shared by executors, the tool executor and the message store
//
// These are runtime types only: the manifest map and source map are static
// lookup tables handed to the operation at creation and never mutated here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lookup table from tool identifier to its manifest
pub type ToolManifestMap = HashMap<String, ToolManifest>;

/// Lookup table from tool identifier to where calls must be routed
pub type ToolSourceMap = HashMap<String, ToolSource>;

/// Kind of tool, also used as the optional third segment of a function name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    #[default]
    Default,
    Builtin,
    Markdown,
    Standalone,
    Mcp,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Default => "default",
            ToolType::Builtin => "builtin",
            ToolType::Markdown => "markdown",
            ToolType::Standalone => "standalone",
            ToolType::Mcp => "mcp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(ToolType::Default),
            "builtin" => Some(ToolType::Builtin),
            "markdown" => Some(ToolType::Markdown),
            "standalone" => Some(ToolType::Standalone),
            "mcp" => Some(ToolType::Mcp),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing source of a tool call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Executed by the server-side builtin runtime
    #[default]
    Builtin,
    /// Installed plugin reachable over HTTP
    Plugin,
    /// Model Context Protocol server
    Mcp,
    /// Must be executed by the connected client
    Client,
}

/// A single API exposed by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolApi {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Schema of a tool: its identifier and the APIs it exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    pub identifier: String,
    #[serde(default)]
    pub api: Vec<ToolApi>,
    #[serde(default, rename = "type")]
    pub tool_type: ToolType,
}

impl ToolManifest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            api: Vec::new(),
            tool_type: ToolType::Default,
        }
    }

    /// Add an API to the manifest
    pub fn with_api(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.api.push(ToolApi {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self
    }

    pub fn with_type(mut self, tool_type: ToolType) -> Self {
        self.tool_type = tool_type;
        self
    }
}

/// A resolved tool call, ready to execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatToolPayload {
    /// Tool call id assigned by the model
    pub id: String,
    /// Tool identifier (key into the manifest map)
    pub identifier: String,
    /// API name within the tool
    pub api_name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
    #[serde(default, rename = "type")]
    pub tool_type: ToolType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ToolSource>,
}

impl ChatToolPayload {
    pub fn new(
        id: impl Into<String>,
        identifier: impl Into<String>,
        api_name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
            api_name: api_name.into(),
            arguments: arguments.into(),
            tool_type: ToolType::Default,
            source: None,
        }
    }

    /// Key used by the pricing table and usage breakdown
    pub fn tool_key(&self) -> String {
        format!("{}/{}", self.identifier, self.api_name)
    }
}

/// Raw tool call as streamed by the model, before name resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub id: String,
    /// Function name in `identifier____api_name[____type]` form
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Context handed to the tool executor for a single call
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub tool_manifest_map: ToolManifestMap,
    pub tool_result_max_length: Option<usize>,
    pub topic_id: Option<String>,
    pub user_id: Option<String>,
}

/// Outcome of executing one tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    pub success: bool,
    /// Wall-clock execution time in milliseconds
    pub execution_time: u64,
}

impl ToolExecutionResult {
    pub fn success(content: impl Into<String>, execution_time: u64) -> Self {
        Self {
            content: content.into(),
            error: None,
            state: None,
            success: true,
            execution_time,
        }
    }

    pub fn failure(error: serde_json::Value, execution_time: u64) -> Self {
        Self {
            content: String::new(),
            error: Some(error),
            state: None,
            success: false,
            execution_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_tool_payload_serialization() {
        let mut payload = ChatToolPayload::new("call_1", "web-search", "search", r#"{"q":"rust"}"#);
        payload.source = Some(ToolSource::Mcp);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["apiName"], "search");
        assert_eq!(json["type"], "default");
        assert_eq!(json["source"], "mcp");
        assert_eq!(payload.tool_key(), "web-search/search");
    }

    #[test]
    fn test_tool_type_parse_rejects_unknown() {
        for t in [
            ToolType::Default,
            ToolType::Builtin,
            ToolType::Markdown,
            ToolType::Standalone,
            ToolType::Mcp,
        ] {
            assert_eq!(ToolType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ToolType::parse("unknown"), None);
    }
}
