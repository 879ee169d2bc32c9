// Agent operation state
//
// AgentState is a value type: executors receive it by value, mutate their own
// copy and hand a new value back. Nothing in this crate keeps a reference to
// a state after a step has returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::AgentMessage;
use crate::tool_types::{ChatToolPayload, ToolManifestMap, ToolSourceMap};
use crate::usage::{Cost, Usage};

/// Lifecycle status of an operation
///
/// `idle -> running -> {done | error | interrupted}`, with
/// `running <-> waiting_for_human` as the only backward edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    WaitingForHuman,
    Done,
    Error,
    Interrupted,
}

impl AgentStatus {
    /// No executor moves a state out of a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Done | AgentStatus::Error | AgentStatus::Interrupted
        )
    }

    /// Counted as "active" by operation statistics
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Running | AgentStatus::WaitingForHuman)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::WaitingForHuman => "waiting_for_human",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
            AgentStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(AgentStatus::Idle),
            "running" => Some(AgentStatus::Running),
            "waiting_for_human" => Some(AgentStatus::WaitingForHuman),
            "done" => Some(AgentStatus::Done),
            "error" => Some(AgentStatus::Error),
            "interrupted" => Some(AgentStatus::Interrupted),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default model/provider used when an instruction omits them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRuntimeConfig {
    pub model: String,
    pub provider: String,
}

impl ModelRuntimeConfig {
    pub fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
        }
    }
}

/// Agent configuration carried with the operation
///
/// Only the fields this runtime reads are typed; everything else is kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Maximum length of tool results handed back to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result_max_length: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Addressing coordinates used to scope message-store queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<AgentConfig>,
}

/// Why an operation was interrupted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    pub reason: String,
    pub interrupted_at: DateTime<Utc>,
    #[serde(default)]
    pub can_resume: bool,
}

/// Full state of one agent operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub operation_id: String,
    pub status: AgentStatus,
    pub step_count: u32,
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub cost: Cost,
    #[serde(default)]
    pub tool_manifest_map: ToolManifestMap,
    #[serde(default)]
    pub tool_source_map: ToolSourceMap,
    /// Default tool list for LLM calls that do not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Set while status is `waiting_for_human`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tools_calling: Option<Vec<ChatToolPayload>>,
    #[serde(default)]
    pub metadata: AgentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<ModelRuntimeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl AgentState {
    /// Create a fresh `idle` state for an operation
    pub fn new(operation_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            operation_id: operation_id.into(),
            status: AgentStatus::Idle,
            step_count: 0,
            messages: Vec::new(),
            usage: Usage::default(),
            cost: Cost::default(),
            tool_manifest_map: ToolManifestMap::new(),
            tool_source_map: ToolSourceMap::new(),
            tools: None,
            pending_tools_calling: None,
            metadata: AgentMetadata {
                agent_id: agent_id.into(),
                ..AgentMetadata::default()
            },
            model_runtime_config: None,
            error: None,
            interruption: None,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn with_message(mut self, message: AgentMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, provider: impl Into<String>) -> Self {
        self.model_runtime_config = Some(ModelRuntimeConfig::new(model, provider));
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.metadata.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.metadata.topic_id = Some(topic_id.into());
        self
    }

    /// Id of the most recent message that has one
    pub fn last_message_id(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| m.id.as_deref())
    }

    /// Move `idle`/`waiting_for_human` to `running`
    pub(crate) fn mark_running(&mut self) {
        if matches!(self.status, AgentStatus::Idle | AgentStatus::WaitingForHuman) {
            self.status = AgentStatus::Running;
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

/// Options for creating operation metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOperationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<AgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<ModelRuntimeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Lightweight, independently queryable view of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOperationMetadata {
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub status: AgentStatus,
    pub total_cost: f64,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<AgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_runtime_config: Option<ModelRuntimeConfig>,
}

impl AgentOperationMetadata {
    /// Fresh `idle` metadata with zeroed counters
    pub fn new(params: CreateOperationParams) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_active_at: now,
            status: AgentStatus::Idle,
            total_cost: 0.0,
            total_steps: 0,
            user_id: params.user_id,
            agent_config: params.agent_config,
            model_runtime_config: params.model_runtime_config,
        }
    }

    /// Copy the summary fields of `state` into the metadata
    pub fn sync_from(&mut self, state: &AgentState) {
        self.status = state.status;
        self.total_cost = state.cost.total;
        self.total_steps = state.step_count;
        self.last_active_at = Utc::now();
    }
}

/// Operation counts grouped by status bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStats {
    pub total: usize,
    /// `running` or `waiting_for_human`
    pub active: usize,
    /// `done`
    pub completed: usize,
    /// `error` or `interrupted`
    pub error: usize,
}

impl OperationStats {
    pub fn record(&mut self, status: AgentStatus) {
        self.record_many(status, 1);
    }

    /// Count `count` operations in `status` at once
    pub fn record_many(&mut self, status: AgentStatus, count: usize) {
        self.total += count;
        match status {
            AgentStatus::Running | AgentStatus::WaitingForHuman => self.active += count,
            AgentStatus::Done => self.completed += count,
            AgentStatus::Error | AgentStatus::Interrupted => self.error += count,
            AgentStatus::Idle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_buckets() {
        assert!(AgentStatus::Done.is_terminal());
        assert!(AgentStatus::Error.is_terminal());
        assert!(AgentStatus::Interrupted.is_terminal());
        assert!(!AgentStatus::WaitingForHuman.is_terminal());
        assert!(AgentStatus::WaitingForHuman.is_active());
        assert!(!AgentStatus::Idle.is_active());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(AgentStatus::WaitingForHuman).unwrap();
        assert_eq!(json, "waiting_for_human");
        assert_eq!(
            AgentStatus::parse("waiting_for_human"),
            Some(AgentStatus::WaitingForHuman)
        );
    }

    #[test]
    fn test_mark_running_leaves_terminal_alone() {
        let mut state = AgentState::new("op", "agent");
        state.mark_running();
        assert_eq!(state.status, AgentStatus::Running);

        state.status = AgentStatus::Done;
        state.mark_running();
        assert_eq!(state.status, AgentStatus::Done);
    }

    #[test]
    fn test_metadata_sync_from_state() {
        let mut state = AgentState::new("op", "agent");
        state.status = AgentStatus::Running;
        state.step_count = 3;
        state.cost.total = 0.5;

        let mut metadata = AgentOperationMetadata::new(CreateOperationParams::default());
        metadata.sync_from(&state);

        assert_eq!(metadata.status, AgentStatus::Running);
        assert_eq!(metadata.total_steps, 3);
        assert_eq!(metadata.total_cost, 0.5);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = OperationStats::default();
        for status in [
            AgentStatus::Idle,
            AgentStatus::Running,
            AgentStatus::WaitingForHuman,
            AgentStatus::Done,
            AgentStatus::Error,
            AgentStatus::Interrupted,
        ] {
            stats.record(status);
        }
        assert_eq!(stats.total, 6);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.error, 2);
    }

    #[test]
    fn test_agent_config_keeps_unknown_fields() {
        let config: AgentConfig =
            serde_json::from_value(serde_json::json!({"toolResultMaxLength": 500, "temperature": 0.2}))
                .unwrap();
        assert_eq!(config.tool_result_max_length, Some(500));
        assert_eq!(config.extra["temperature"], 0.2);
    }
}
