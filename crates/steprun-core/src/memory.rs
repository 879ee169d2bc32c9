// In-memory implementations for single-node deployments and testing
//
// InMemoryStateStore and InMemoryEventBus are full backends: they honour the
// same contracts as the PostgreSQL ones, with a shorter inactivity threshold.
// The message store, chat model and tool executor are test collaborators.
//
// Every instance is constructed explicitly and injected; there is no
// process-wide singleton.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{EventBusLimits, StateStoreLimits};
use crate::error::{Result, RuntimeError};
use crate::events::{parse_cursor, StreamEvent, StreamEventInput, StreamEventType};
use crate::llm::{ChatPayload, ChatStream, ChatStreamEvent};
use crate::message::{
    AgentMessage, CreateMessageParams, CreatedMessage, MessageQuery, UpdateMessageParams,
};
use crate::state::{AgentOperationMetadata, AgentState, CreateOperationParams, OperationStats};
use crate::step::StepResult;
use crate::tool_types::{
    ChatToolPayload, RawToolCall, ToolExecutionContext, ToolExecutionResult,
};
use crate::traits::{ChatModel, EventBus, MessageStore, StateStore, ToolExecutor};
use crate::usage::ModelUsage;

/// True when `since` lies further in the past than `window`
fn older_than(since: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    (now - since)
        .to_std()
        .map(|age| age > window)
        .unwrap_or(false)
}

// ============================================================================
// InMemoryStateStore
// ============================================================================

#[derive(Debug, Default)]
struct OperationRecord {
    state: Option<AgentState>,
    history: VecDeque<StepResult>,
    metadata: Option<AgentOperationMetadata>,
}

impl OperationRecord {
    fn sync_metadata(&mut self, state: &AgentState) {
        self.metadata
            .get_or_insert_with(|| AgentOperationMetadata::new(CreateOperationParams::default()))
            .sync_from(state);
    }

    fn last_active_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .as_ref()
            .map(|m| m.last_active_at)
            .or_else(|| self.state.as_ref().map(|s| s.last_modified))
    }
}

/// In-memory state store
///
/// All three sub-writes of `save_step_result` happen under one write lock.
#[derive(Debug, Clone)]
pub struct InMemoryStateStore {
    operations: Arc<RwLock<HashMap<String, OperationRecord>>>,
    limits: StateStoreLimits,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::with_limits(StateStoreLimits::in_process())
    }

    pub fn with_limits(limits: StateStoreLimits) -> Self {
        Self {
            operations: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    pub fn limits(&self) -> &StateStoreLimits {
        &self.limits
    }

    /// Number of operations with any stored data
    pub async fn operation_count(&self) -> usize {
        self.operations.read().await.len()
    }

    /// Drop everything
    pub async fn clear(&self) {
        self.operations.write().await.clear();
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_operation_metadata(
        &self,
        operation_id: &str,
        params: CreateOperationParams,
    ) -> Result<()> {
        let mut operations = self.operations.write().await;
        operations.entry(operation_id.to_string()).or_default().metadata =
            Some(AgentOperationMetadata::new(params));
        debug!(operation_id = %operation_id, "Created operation metadata");
        Ok(())
    }

    async fn save_agent_state(&self, operation_id: &str, state: &AgentState) -> Result<()> {
        let mut operations = self.operations.write().await;
        let record = operations.entry(operation_id.to_string()).or_default();
        record.state = Some(state.clone());
        record.sync_metadata(state);
        Ok(())
    }

    async fn load_agent_state(&self, operation_id: &str) -> Result<Option<AgentState>> {
        let operations = self.operations.read().await;
        Ok(operations.get(operation_id).and_then(|r| r.state.clone()))
    }

    async fn save_step_result(&self, operation_id: &str, step: &StepResult) -> Result<()> {
        let mut operations = self.operations.write().await;
        let record = operations.entry(operation_id.to_string()).or_default();

        record.state = Some(step.new_state.clone());
        record.history.push_back(step.clone());
        while record.history.len() > self.limits.history_cap {
            record.history.pop_front();
        }
        record.sync_metadata(&step.new_state);

        debug!(
            operation_id = %operation_id,
            step_index = step.step_index,
            status = %step.new_state.status,
            "Saved step result"
        );
        Ok(())
    }

    async fn get_execution_history(
        &self,
        operation_id: &str,
        limit: usize,
    ) -> Result<Vec<StepResult>> {
        let operations = self.operations.read().await;
        let Some(record) = operations.get(operation_id) else {
            return Ok(Vec::new());
        };
        let skip = record.history.len().saturating_sub(limit);
        Ok(record.history.iter().skip(skip).cloned().collect())
    }

    async fn get_operation_metadata(
        &self,
        operation_id: &str,
    ) -> Result<Option<AgentOperationMetadata>> {
        let operations = self.operations.read().await;
        Ok(operations.get(operation_id).and_then(|r| r.metadata.clone()))
    }

    async fn get_active_operations(&self) -> Result<Vec<String>> {
        let operations = self.operations.read().await;
        Ok(operations
            .iter()
            .filter(|(_, r)| r.metadata.is_some())
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_stats(&self) -> Result<OperationStats> {
        let operations = self.operations.read().await;
        let mut stats = OperationStats::default();
        for metadata in operations.values().filter_map(|r| r.metadata.as_ref()) {
            stats.record(metadata.status);
        }
        Ok(stats)
    }

    async fn cleanup_expired_operations(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let threshold = self.limits.inactivity_threshold;
        let mut operations = self.operations.write().await;

        let expired: Vec<String> = operations
            .iter()
            .filter(|(_, r)| {
                r.last_active_at()
                    .is_some_and(|at| older_than(at, threshold, now))
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            operations.remove(id);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Cleaned up expired operations");
        }
        Ok(expired)
    }

    async fn delete_agent_operation(&self, operation_id: &str) -> Result<()> {
        self.operations.write().await.remove(operation_id);
        debug!(operation_id = %operation_id, "Deleted operation");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("In-memory state store disconnected");
        Ok(())
    }
}

// ============================================================================
// InMemoryEventBus
// ============================================================================

/// Direct subscriber callback, invoked synchronously on publish
pub type EventCallback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

const NOTIFY_CAPACITY: usize = 1024;

struct OperationStream {
    events: VecDeque<StreamEvent>,
    last_write: DateTime<Utc>,
}

#[derive(Default)]
struct BusInner {
    streams: HashMap<String, OperationStream>,
    subscribers: HashMap<String, Vec<(u64, EventCallback)>>,
    sequence: u64,
}

/// In-memory event bus
///
/// Cursors come from one bus-wide sequence, assigned under the write lock so
/// they increase in publish order.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<RwLock<BusInner>>,
    notifier: broadcast::Sender<StreamEvent>,
    next_subscription: Arc<AtomicU64>,
    limits: EventBusLimits,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_limits(EventBusLimits::default())
    }

    pub fn with_limits(limits: EventBusLimits) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(BusInner::default())),
            notifier,
            next_subscription: Arc::new(AtomicU64::new(1)),
            limits,
        }
    }

    /// Register a direct subscriber; returns an id for `unsubscribe`
    pub async fn subscribe<F>(&self, operation_id: &str, callback: F) -> u64
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .await
            .subscribers
            .entry(operation_id.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub async fn unsubscribe(&self, operation_id: &str, subscription_id: u64) {
        let mut inner = self.inner.write().await;
        if let Some(subscribers) = inner.subscribers.get_mut(operation_id) {
            subscribers.retain(|(id, _)| *id != subscription_id);
            if subscribers.is_empty() {
                inner.subscribers.remove(operation_id);
            }
        }
    }

    /// Live events of an operation, oldest first
    pub async fn events(&self, operation_id: &str) -> Vec<StreamEvent> {
        self.events_after(operation_id, 0).await
    }

    /// First event of `event_type`, already published or arriving within `timeout`
    pub async fn wait_for_event(
        &self,
        operation_id: &str,
        event_type: StreamEventType,
        timeout: Duration,
    ) -> Option<StreamEvent> {
        let mut receiver = self.notifier.subscribe();

        if let Some(existing) = self
            .events(operation_id)
            .await
            .into_iter()
            .find(|e| e.event_type == event_type)
        {
            return Some(existing);
        }

        let wait = async {
            loop {
                match receiver.recv().await {
                    Ok(event)
                        if event.operation_id == operation_id && event.event_type == event_type =>
                    {
                        return Some(event)
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    async fn events_after(&self, operation_id: &str, cursor: u64) -> Vec<StreamEvent> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        match inner.streams.get(operation_id) {
            Some(stream) if !older_than(stream.last_write, self.limits.ttl, now) => stream
                .events
                .iter()
                .filter(|e| e.cursor().is_some_and(|c| c > cursor))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish_stream_event(
        &self,
        operation_id: &str,
        event: StreamEventInput,
    ) -> Result<String> {
        let now = Utc::now();
        let (event, callbacks) = {
            let mut guard = self.inner.write().await;
            let inner = &mut *guard;

            inner.sequence += 1;
            let event = event.into_event(operation_id, Some(inner.sequence.to_string()));

            let stream = inner
                .streams
                .entry(operation_id.to_string())
                .or_insert_with(|| OperationStream {
                    events: VecDeque::new(),
                    last_write: now,
                });
            if older_than(stream.last_write, self.limits.ttl, now) {
                stream.events.clear();
            }
            stream.events.push_back(event.clone());
            while stream.events.len() > self.limits.max_len {
                stream.events.pop_front();
            }
            stream.last_write = now;

            let callbacks: Vec<EventCallback> = inner
                .subscribers
                .get(operation_id)
                .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            (event, callbacks)
        };

        for callback in &callbacks {
            callback(&event);
        }

        let id = event.id.clone().unwrap_or_default();
        debug!(
            operation_id = %operation_id,
            event_type = %event.event_type,
            id = %id,
            "Published stream event"
        );
        // No receivers is fine
        let _ = self.notifier.send(event);
        Ok(id)
    }

    async fn subscribe_stream_events(
        &self,
        operation_id: &str,
        from_cursor: &str,
        on_events: &mut (dyn FnMut(Vec<StreamEvent>) + Send),
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut cursor = parse_cursor(from_cursor)?;
        let mut receiver = self.notifier.subscribe();

        loop {
            if *cancel.borrow() {
                break;
            }

            let batch = self.events_after(operation_id, cursor).await;
            if let Some(last) = batch.last().and_then(StreamEvent::cursor) {
                cursor = last;
                on_events(batch);
            }

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = receiver.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = received {
                        break;
                    }
                }
            }
        }

        debug!(operation_id = %operation_id, cursor, "Stream subscription stopped");
        Ok(())
    }

    async fn get_stream_history(
        &self,
        operation_id: &str,
        count: usize,
    ) -> Result<Vec<StreamEvent>> {
        let mut events = self.events(operation_id).await;
        events.reverse();
        events.truncate(count);
        Ok(events)
    }

    async fn cleanup_operation(&self, operation_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.streams.remove(operation_id);
        inner.subscribers.remove(operation_id);
        debug!(operation_id = %operation_id, "Cleaned up event stream");
        Ok(())
    }

    async fn purge_expired_streams(&self) -> Result<usize> {
        let now = Utc::now();
        let ttl = self.limits.ttl;
        let mut inner = self.inner.write().await;
        let before = inner.streams.len();
        inner
            .streams
            .retain(|_, stream| !older_than(stream.last_write, ttl, now));
        Ok(before - inner.streams.len())
    }

    async fn get_active_operations_count(&self) -> Result<usize> {
        let now = Utc::now();
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .values()
            .filter(|s| !older_than(s.last_write, self.limits.ttl, now))
            .count())
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.write().await.subscribers.clear();
        debug!("In-memory event bus disconnected");
        Ok(())
    }
}

// ============================================================================
// InMemoryMessageStore
// ============================================================================

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    params: CreateMessageParams,
    reasoning: Option<String>,
    tools: Option<Vec<ChatToolPayload>>,
    metadata: Option<serde_json::Value>,
    search: Option<serde_json::Value>,
    image_list: Option<Vec<serde_json::Value>>,
}

impl StoredMessage {
    fn to_agent_message(&self) -> AgentMessage {
        AgentMessage {
            id: Some(self.id.clone()),
            role: self.params.role,
            content: self.params.content.clone(),
            reasoning: self.reasoning.clone(),
            tools: self.tools.clone(),
            tool_call_id: self.params.tool_call_id.clone(),
            plugin: self.params.plugin.clone(),
            plugin_state: self.params.plugin_state.clone(),
            plugin_error: self.params.plugin_error.clone(),
            intervention: self.params.intervention.clone(),
        }
    }

    fn matches(&self, query: &MessageQuery) -> bool {
        query
            .agent_id
            .as_ref()
            .map_or(true, |agent| *agent == self.params.agent_id)
            && query.thread_id == self.params.thread_id
            && query.topic_id == self.params.topic_id
    }
}

/// In-memory message store
///
/// Ids are UUID v7, so creation order and id order agree.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMessageStore {
    messages: Arc<RwLock<Vec<StoredMessage>>>,
    failing_tool_calls: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make creation of the tool message answering `tool_call_id` fail
    pub async fn fail_create_for_tool_call(&self, tool_call_id: impl Into<String>) {
        self.failing_tool_calls.write().await.insert(tool_call_id.into());
    }

    /// All messages, in creation order
    pub async fn messages(&self) -> Vec<AgentMessage> {
        self.messages
            .read()
            .await
            .iter()
            .map(StoredMessage::to_agent_message)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<AgentMessage> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .map(StoredMessage::to_agent_message)
    }

    /// Metadata recorded by the last update of a message
    pub async fn metadata(&self, id: &str) -> Option<serde_json::Value> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.metadata.clone())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(&self, params: CreateMessageParams) -> Result<CreatedMessage> {
        if let Some(tool_call_id) = &params.tool_call_id {
            if self.failing_tool_calls.read().await.contains(tool_call_id) {
                return Err(RuntimeError::message_store(format!(
                    "Rejected message for tool call {tool_call_id}"
                )));
            }
        }

        let id = Uuid::now_v7().to_string();
        self.messages.write().await.push(StoredMessage {
            id: id.clone(),
            params,
            reasoning: None,
            tools: None,
            metadata: None,
            search: None,
            image_list: None,
        });
        Ok(CreatedMessage { id })
    }

    async fn update(&self, id: &str, params: UpdateMessageParams) -> Result<()> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| RuntimeError::message_store(format!("Message not found: {id}")))?;

        if let Some(content) = params.content {
            message.params.content = content;
        }
        if params.reasoning.is_some() {
            message.reasoning = params.reasoning;
        }
        if params.tools.is_some() {
            message.tools = params.tools;
        }
        if params.metadata.is_some() {
            message.metadata = params.metadata;
        }
        if params.search.is_some() {
            message.search = params.search;
        }
        if params.image_list.is_some() {
            message.image_list = params.image_list;
        }
        Ok(())
    }

    async fn query(&self, query: &MessageQuery) -> Result<Vec<AgentMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.matches(query))
            .map(StoredMessage::to_agent_message)
            .collect())
    }
}

// ============================================================================
// MockChatModel - Scripted streaming responses
// ============================================================================

#[derive(Debug, Clone)]
enum ScriptedItem {
    Event(ChatStreamEvent),
    Fail(String),
}

/// One scripted chat response: a sequence of stream items with delays
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    items: Vec<(Duration, ScriptedItem)>,
    pending_delay: Duration,
}

impl ScriptedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain text reply with a small usage report
    pub fn reply(text: impl Into<String>) -> Self {
        Self::new()
            .text(text)
            .completion(ModelUsage::new(10, 5))
    }

    fn push(mut self, item: ScriptedItem) -> Self {
        let delay = std::mem::take(&mut self.pending_delay);
        self.items.push((delay, item));
        self
    }

    /// Delay the next item
    pub fn wait(mut self, delay: Duration) -> Self {
        self.pending_delay += delay;
        self
    }

    pub fn text(self, delta: impl Into<String>) -> Self {
        self.push(ScriptedItem::Event(ChatStreamEvent::Text(delta.into())))
    }

    pub fn thinking(self, delta: impl Into<String>) -> Self {
        self.push(ScriptedItem::Event(ChatStreamEvent::Thinking(delta.into())))
    }

    pub fn tools_calling(self, calls: Vec<RawToolCall>) -> Self {
        self.push(ScriptedItem::Event(ChatStreamEvent::ToolsCalling(calls)))
    }

    pub fn grounding(self, grounding: serde_json::Value) -> Self {
        self.push(ScriptedItem::Event(ChatStreamEvent::Grounding(grounding)))
    }

    pub fn completion(self, usage: ModelUsage) -> Self {
        self.push(ScriptedItem::Event(ChatStreamEvent::Completion(usage)))
    }

    /// End the stream with an error
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(ScriptedItem::Fail(message.into()))
    }
}

/// Chat model replaying scripted responses in order
#[derive(Debug, Clone, Default)]
pub struct MockChatModel {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<ChatPayload>>>,
}

impl MockChatModel {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn push_response(&self, response: ScriptedResponse) {
        self.responses.lock().await.push_back(response);
    }

    /// Payloads received so far
    pub async fn requests(&self) -> Vec<ChatPayload> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, payload: ChatPayload, _user_id: Option<&str>) -> Result<ChatStream> {
        self.requests.lock().await.push(payload);
        let response = self
            .responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| RuntimeError::llm("No scripted response left"))?;

        let stream = futures::stream::iter(response.items).then(|(delay, item)| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match item {
                ScriptedItem::Event(event) => Ok(event),
                ScriptedItem::Fail(message) => Err(RuntimeError::llm(message)),
            }
        });
        Ok(Box::pin(stream))
    }
}

// ============================================================================
// MockToolExecutor - Configurable tool outcomes
// ============================================================================

#[derive(Debug, Clone)]
enum MockToolBehavior {
    Result(ToolExecutionResult),
    Fail(String),
}

/// Tool executor for tests
///
/// Unconfigured tools succeed and echo their arguments. Behaviours are keyed
/// by `identifier/api_name`.
#[derive(Debug, Clone, Default)]
pub struct MockToolExecutor {
    behaviors: HashMap<String, MockToolBehavior>,
    delays: HashMap<String, Duration>,
    calls: Arc<RwLock<Vec<ChatToolPayload>>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, tool_key: impl Into<String>, result: ToolExecutionResult) -> Self {
        self.behaviors
            .insert(tool_key.into(), MockToolBehavior::Result(result));
        self
    }

    /// Make the tool fail to execute at all
    pub fn with_failure(mut self, tool_key: impl Into<String>, message: impl Into<String>) -> Self {
        self.behaviors
            .insert(tool_key.into(), MockToolBehavior::Fail(message.into()));
        self
    }

    pub fn with_delay(mut self, tool_key: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(tool_key.into(), delay);
        self
    }

    /// Calls received so far, in arrival order
    pub async fn calls(&self) -> Vec<ChatToolPayload> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute_tool(
        &self,
        payload: &ChatToolPayload,
        _context: &ToolExecutionContext,
    ) -> Result<ToolExecutionResult> {
        self.calls.write().await.push(payload.clone());

        let key = payload.tool_key();
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }

        match self.behaviors.get(&key) {
            Some(MockToolBehavior::Result(result)) => Ok(result.clone()),
            Some(MockToolBehavior::Fail(message)) => Err(RuntimeError::tool(message.clone())),
            None => Ok(ToolExecutionResult::success(payload.arguments.clone(), 1)),
        }
    }
}
