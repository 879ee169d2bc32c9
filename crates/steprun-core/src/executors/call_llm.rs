// call_llm executor
//
// Streams one chat call. Text and reasoning deltas are collected in a
// FlushBuffer and published as `stream_chunk` events at most once per flush
// interval. Any other stream item first flushes the buffer so chunks stay in
// arrival order on the wire. The stream is drained completely before the
// executor returns.

use serde_json::json;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use futures::StreamExt;

use super::{begin_execution, message_params, session_snapshot, RuntimeExecutors};
use crate::error::{Result, RuntimeError};
use crate::events::{RuntimeEvent, StreamChunk, StreamEventInput, StreamEventType};
use crate::instruction::{CallLlmPayload, PhasePayload, RuntimeContext, RuntimePhase};
use crate::llm::{ChatPayload, ChatStream, ChatStreamEvent};
use crate::message::{AgentMessage, MessageRole, UpdateMessageParams};
use crate::state::AgentState;
use crate::step::ExecutorResult;
use crate::tool_names;
use crate::tool_types::ChatToolPayload;
use crate::usage::{accumulate_llm, Cost, ModelUsage, Usage};

/// Pending text/reasoning and the deadline of the next flush.
///
/// `deadline == None` means idle: nothing buffered, no timer armed. The
/// first delta arms the timer; `take` flushes and returns to idle. The
/// buffer is local to one call, so dropping it cancels the timer on every
/// exit path.
#[derive(Debug)]
struct FlushBuffer {
    text: String,
    reasoning: String,
    deadline: Option<Instant>,
    interval: Duration,
}

impl FlushBuffer {
    fn new(interval: Duration) -> Self {
        Self {
            text: String::new(),
            reasoning: String::new(),
            deadline: None,
            interval,
        }
    }

    fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.arm();
    }

    fn push_reasoning(&mut self, delta: &str) {
        self.reasoning.push_str(delta);
        self.arm();
    }

    fn arm(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    /// Drain both buffers and disarm the timer
    fn take(&mut self) -> (Option<String>, Option<String>) {
        self.deadline = None;
        let text = std::mem::take(&mut self.text);
        let reasoning = std::mem::take(&mut self.reasoning);
        (
            (!text.is_empty()).then_some(text),
            (!reasoning.is_empty()).then_some(reasoning),
        )
    }
}

/// Everything collected from one drained stream
#[derive(Debug, Default)]
struct LlmOutput {
    content: String,
    reasoning: String,
    tool_calls: Vec<ChatToolPayload>,
    grounding: Option<serde_json::Value>,
    images: Vec<serde_json::Value>,
    usage: Option<ModelUsage>,
}

impl RuntimeExecutors {
    pub(super) async fn call_llm(
        &self,
        payload: CallLlmPayload,
        state: AgentState,
    ) -> Result<ExecutorResult> {
        let operation_id = state.operation_id.clone();
        let step_index = state.step_count;

        let defaults = state.model_runtime_config.as_ref();
        let model = payload
            .model
            .clone()
            .or_else(|| defaults.map(|c| c.model.clone()));
        let provider = payload
            .provider
            .clone()
            .or_else(|| defaults.map(|c| c.provider.clone()));

        let (Some(model), Some(provider)) = (model, provider) else {
            let error = RuntimeError::llm("No model or provider configured for LLM call");
            self.publish_error(&operation_id, step_index, &error, "llm_execution", None)
                .await;
            return Err(error);
        };

        match self.run_llm_call(payload, state, model, provider).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(operation_id = %operation_id, step_index, error = %e, "LLM call failed");
                self.publish_error(&operation_id, step_index, &e, "llm_execution", None)
                    .await;
                Err(e)
            }
        }
    }

    async fn run_llm_call(
        &self,
        payload: CallLlmPayload,
        mut state: AgentState,
        model: String,
        provider: String,
    ) -> Result<ExecutorResult> {
        let operation_id = state.operation_id.clone();
        let step_index = state.step_count;
        begin_execution(&mut state);

        let tools = payload
            .tools
            .or_else(|| state.tools.clone())
            .unwrap_or_default();
        let messages = if payload.messages.is_empty() {
            state.messages.clone()
        } else {
            payload.messages
        };
        let message_count = messages.len();

        let assistant_id = match payload.assistant_message_id {
            Some(id) => id,
            None => {
                let mut params = message_params(&state, MessageRole::Assistant);
                params.parent_id = payload.parent_message_id.clone();
                params.model = Some(model.clone());
                params.provider = Some(provider.clone());
                self.message_store.create(params).await?.id
            }
        };

        self.event_bus
            .publish_stream_event(
                &operation_id,
                StreamEventInput::new(
                    StreamEventType::StreamStart,
                    step_index,
                    json!({
                        "assistantMessage": { "id": assistant_id },
                        "model": model,
                        "provider": provider,
                    }),
                ),
            )
            .await?;

        let mut events = vec![RuntimeEvent::LlmStart {
            model: model.clone(),
            provider: provider.clone(),
            message_count,
        }];

        let chat_payload = ChatPayload {
            messages,
            model: model.clone(),
            provider: provider.clone(),
            tools: tool_names::tool_functions(&tools, &state.tool_manifest_map),
        };

        let started = Instant::now();
        let stream = self
            .chat_model
            .chat(chat_payload, self.user_id.as_deref())
            .await?;
        let output = self.drain_stream(stream, &state, &mut events).await?;
        let processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let report = output.usage.clone().unwrap_or_default();
        let (usage, cost) = accumulate_llm(
            &state.usage,
            &state.cost,
            &model,
            &report,
            processing_time_ms,
        );
        let (step_usage, _) = accumulate_llm(
            &Usage::default(),
            &Cost::default(),
            &model,
            &report,
            processing_time_ms,
        );
        state.usage = usage;
        state.cost = cost;

        let LlmOutput {
            content,
            reasoning,
            tool_calls,
            grounding,
            images,
            ..
        } = output;
        let reasoning = (!reasoning.is_empty()).then_some(reasoning);
        let tools_field = (!tool_calls.is_empty()).then(|| tool_calls.clone());

        let update = UpdateMessageParams {
            content: Some(content.clone()),
            reasoning: reasoning.clone(),
            tools: tools_field.clone(),
            metadata: Some(json!({
                "usage": report,
                "processingTimeMs": processing_time_ms,
            })),
            search: grounding.clone(),
            image_list: (!images.is_empty()).then_some(images),
        };
        if let Err(e) = self.message_store.update(&assistant_id, update).await {
            warn!(
                operation_id = %operation_id,
                message_id = %assistant_id,
                error = %e,
                "Failed to update assistant message, continuing"
            );
        }

        let mut message = AgentMessage::assistant(content.clone()).with_id(assistant_id.clone());
        message.reasoning = reasoning.clone();
        message.tools = tools_field;
        state.messages.push(message);

        self.event_bus
            .publish_stream_event(
                &operation_id,
                StreamEventInput::new(
                    StreamEventType::StreamEnd,
                    step_index,
                    json!({
                        "finalContent": content,
                        "reasoning": reasoning,
                        "toolCalls": tool_calls,
                        "grounding": grounding,
                        "usage": report,
                    }),
                ),
            )
            .await?;

        events.push(RuntimeEvent::LlmResult {
            content: content.clone(),
            reasoning: reasoning.clone(),
            tool_calls: tool_calls.clone(),
        });

        info!(
            operation_id = %operation_id,
            step_index,
            model = %model,
            tool_calls = tool_calls.len(),
            processing_time_ms,
            "LLM call completed"
        );

        let context = RuntimeContext {
            phase: RuntimePhase::LlmResult,
            payload: PhasePayload::LlmResult {
                has_tools_calling: !tool_calls.is_empty(),
                tools_calling: tool_calls,
                parent_message_id: Some(assistant_id),
                content,
                reasoning,
            },
            session: session_snapshot(&state),
            step_usage: Some(step_usage),
        };

        Ok(ExecutorResult::new(state)
            .with_events(events)
            .with_context(context))
    }

    /// Consume the stream until it ends, publishing buffered chunks
    async fn drain_stream(
        &self,
        mut stream: ChatStream,
        state: &AgentState,
        events: &mut Vec<RuntimeEvent>,
    ) -> Result<LlmOutput> {
        let operation_id = state.operation_id.as_str();
        let step_index = state.step_count;
        let mut buffer = FlushBuffer::new(self.flush_interval);
        let mut output = LlmOutput::default();

        loop {
            // None: the flush timer fired before the next item arrived
            let next = match buffer.deadline {
                Some(deadline) => tokio::select! {
                    item = stream.next() => Some(item),
                    _ = tokio::time::sleep_until(deadline) => None,
                },
                None => Some(stream.next().await),
            };

            let event = match next {
                None => {
                    self.flush(&mut buffer, operation_id, step_index, events)
                        .await?;
                    continue;
                }
                Some(None) => break,
                Some(Some(item)) => item?,
            };

            match event {
                ChatStreamEvent::Text(delta) => {
                    output.content.push_str(&delta);
                    buffer.push_text(&delta);
                }
                ChatStreamEvent::Thinking(delta) => {
                    output.reasoning.push_str(&delta);
                    buffer.push_reasoning(&delta);
                }
                ChatStreamEvent::ToolsCalling(raw_calls) => {
                    self.flush(&mut buffer, operation_id, step_index, events)
                        .await?;
                    let resolved: Vec<ChatToolPayload> = raw_calls
                        .iter()
                        .filter_map(|call| {
                            let payload = tool_names::resolve(
                                call,
                                &state.tool_manifest_map,
                                &state.tool_source_map,
                            );
                            if payload.is_none() {
                                warn!(
                                    operation_id = %operation_id,
                                    name = %call.name,
                                    "Dropping tool call with unresolvable name"
                                );
                            }
                            payload
                        })
                        .collect();
                    self.publish_chunk(
                        operation_id,
                        step_index,
                        StreamChunk::tools_calling(resolved.clone()),
                        events,
                    )
                    .await?;
                    output.tool_calls = resolved;
                }
                ChatStreamEvent::Grounding(grounding) => {
                    self.flush(&mut buffer, operation_id, step_index, events)
                        .await?;
                    self.publish_chunk(
                        operation_id,
                        step_index,
                        StreamChunk::grounding(grounding.clone()),
                        events,
                    )
                    .await?;
                    output.grounding = Some(grounding);
                }
                ChatStreamEvent::Base64Image(image) => {
                    self.flush(&mut buffer, operation_id, step_index, events)
                        .await?;
                    self.publish_chunk(
                        operation_id,
                        step_index,
                        StreamChunk::base64_image(image.clone()),
                        events,
                    )
                    .await?;
                    output.images.push(image);
                }
                ChatStreamEvent::Completion(usage) => {
                    output.usage = Some(usage);
                }
            }
        }

        // Stream ended: trailing deltas go out before anything else
        self.flush(&mut buffer, operation_id, step_index, events)
            .await?;
        Ok(output)
    }

    async fn flush(
        &self,
        buffer: &mut FlushBuffer,
        operation_id: &str,
        step_index: u32,
        events: &mut Vec<RuntimeEvent>,
    ) -> Result<()> {
        let (text, reasoning) = buffer.take();
        if let Some(reasoning) = reasoning {
            self.publish_chunk(operation_id, step_index, StreamChunk::reasoning(reasoning), events)
                .await?;
        }
        if let Some(text) = text {
            self.publish_chunk(operation_id, step_index, StreamChunk::text(text), events)
                .await?;
        }
        Ok(())
    }

    async fn publish_chunk(
        &self,
        operation_id: &str,
        step_index: u32,
        chunk: StreamChunk,
        events: &mut Vec<RuntimeEvent>,
    ) -> Result<()> {
        self.event_bus
            .publish_stream_chunk(operation_id, step_index, &chunk)
            .await?;
        events.push(RuntimeEvent::LlmStream { chunk });
        Ok(())
    }
}
