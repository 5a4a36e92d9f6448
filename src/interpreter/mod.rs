//! Response interpreter: turns provider output into stream chunks.
//!
//! Structured calls and tagged calls are detected independently and both
//! become [`StreamChunk::ToolCallRequest`]s; everything downstream
//! (execution, limits, termination) is syntax-agnostic.

pub mod structured;
pub mod tagged;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::config::{RunConfiguration, TerminationPolicy};
use crate::error::RuntimeError;
use crate::executor::{ExecutionSession, ToolExecutor};
use crate::observe::{emit, ObservabilitySink, RuntimeEvent, RuntimeEventKind};
use crate::provider::{ProviderEvent, ProviderOutput, ProviderStopReason};
use crate::thread::store::ThreadStore;
use crate::tools::{is_terminating_tool, ToolRegistry};
use crate::types::{
    ChatMessage, FinishReason, MessageKind, NewMessage, StatusKind, StatusUpdate, StreamChunk,
    ThreadId, ToolCall, ToolInvocationRequest, ToolInvocationResult, Usage,
};

pub use structured::StructuredCallAccumulator;
pub use tagged::{extract_arguments, DetectedTag, TaggedCallDetector};

/// Where the interpreted response is recorded.
#[derive(Clone)]
pub struct TurnContext {
    pub thread_id: ThreadId,
    pub store: Arc<dyn ThreadStore>,
    pub sink: Option<Arc<dyn ObservabilitySink>>,
}

/// Interprets one provider response.
pub struct ResponseInterpreter {
    registry: Arc<ToolRegistry>,
    executor: ToolExecutor,
    config: RunConfiguration,
    turn: TurnContext,
}

impl ResponseInterpreter {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: ToolExecutor,
        config: RunConfiguration,
        turn: TurnContext,
    ) -> Self {
        Self {
            registry,
            executor,
            config,
            turn,
        }
    }

    /// Lazily interpret `output`.
    ///
    /// The returned stream ends with exactly one `Finish` chunk. Before it,
    /// the assistant message and every tool result are appended to the
    /// thread. Failures are reported in-band as an error status followed by
    /// `Finish { reason: Error }`.
    pub fn interpret(self, output: ProviderOutput) -> BoxStream<'static, StreamChunk> {
        let Self {
            registry,
            executor,
            config,
            turn,
        } = self;

        let stream = async_stream::stream! {
            let mut events = output.into_events();
            let mut state = TurnState::new(registry, &executor, config);
            let mut provider_error: Option<RuntimeError> = None;

            loop {
                let next = match state.session.as_mut().filter(|s| s.outstanding() > 0) {
                    Some(session) => tokio::select! {
                        biased;
                        result = session.next_result() => Next::Result(result),
                        event = events.next() => Next::Event(event),
                    },
                    None => Next::Event(events.next().await),
                };

                match next {
                    Next::Result(Some(result)) => {
                        state.results.push(result.clone());
                        yield StreamChunk::ToolResult { result };
                    }
                    Next::Result(None) => {}
                    Next::Event(None) => break,
                    Next::Event(Some(Err(err))) => {
                        provider_error = Some(err);
                        break;
                    }
                    Next::Event(Some(Ok(event))) => {
                        for chunk in state.on_event(event) {
                            yield chunk;
                        }
                        if state.limit_hit {
                            tracing::debug!(
                                thread_id = %turn.thread_id,
                                count = state.tagged_count,
                                "tagged call limit reached; discarding rest of response"
                            );
                            break;
                        }
                    }
                }
            }
            drop(events);

            if provider_error.is_none() && !state.limit_hit {
                for chunk in state.flush_tagged() {
                    yield chunk;
                }
            }
            if provider_error.is_none() && !state.limit_hit {
                for chunk in state.flush_structured() {
                    yield chunk;
                }
            }
            state.dispatch_deferred();

            if let Some(mut session) = state.session.take() {
                session.close();
                while let Some(result) = session.next_result().await {
                    state.results.push(result.clone());
                    yield StreamChunk::ToolResult { result };
                }
            }

            if let Some(err) = &provider_error {
                tracing::warn!(thread_id = %turn.thread_id, error = %err, "provider stream failed");
                emit(
                    &turn.sink,
                    RuntimeEvent::new(
                        RuntimeEventKind::ProviderError,
                        turn.thread_id,
                        serde_json::json!({ "error": err.to_string(), "phase": "stream" }),
                    ),
                );
            }

            let mut error = provider_error.map(|e| e.to_string());
            if let Err(err) = state.persist(&turn).await {
                tracing::warn!(thread_id = %turn.thread_id, error = %err, "failed to persist response");
                error.get_or_insert(err.to_string());
            }

            match error {
                Some(message) => {
                    yield StreamChunk::error_status(message.clone());
                    yield StreamChunk::finish_with_error(message);
                }
                None => yield StreamChunk::finish(state.finish_reason()),
            }
        };
        Box::pin(stream)
    }
}

enum Next {
    Result(Option<ToolInvocationResult>),
    Event(Option<Result<ProviderEvent, RuntimeError>>),
}

/// Mutable state of one response.
struct TurnState {
    registry: Arc<ToolRegistry>,
    config: RunConfiguration,
    session: Option<ExecutionSession>,
    detector: Option<TaggedCallDetector>,
    structured: StructuredCallAccumulator,
    /// Requests waiting for the response to end (`execute_on_stream = false`).
    deferred: Vec<ToolInvocationRequest>,
    text: String,
    structured_calls: Vec<ToolCall>,
    results: Vec<ToolInvocationResult>,
    surfaced: usize,
    tagged_count: usize,
    limit_hit: bool,
    terminating: bool,
    stop_reason: Option<ProviderStopReason>,
    usage: Usage,
}

impl TurnState {
    fn new(registry: Arc<ToolRegistry>, executor: &ToolExecutor, config: RunConfiguration) -> Self {
        let detector = config
            .use_tagged_syntax
            .then(|| TaggedCallDetector::new(registry.tag_names()));
        let session = config.execute_tools.then(|| executor.session(config.concurrency));
        Self {
            registry,
            config,
            session,
            detector,
            structured: StructuredCallAccumulator::new(),
            deferred: Vec::new(),
            text: String::new(),
            structured_calls: Vec::new(),
            results: Vec::new(),
            surfaced: 0,
            tagged_count: 0,
            limit_hit: false,
            terminating: false,
            stop_reason: None,
            usage: Usage::default(),
        }
    }

    fn ignoring_calls(&self) -> bool {
        self.terminating && self.config.termination_policy == TerminationPolicy::IgnoreRemainingCalls
    }

    fn on_event(&mut self, event: ProviderEvent) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        match event {
            ProviderEvent::TextDelta(delta) => self.on_text(&delta, &mut out),
            ProviderEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                if !self.config.use_structured_calls {
                    tracing::debug!(index, "structured calls disabled; fragment ignored");
                } else if let Some(call) = self.structured.push_delta(index, id, name, &arguments) {
                    self.on_structured_call(call, &mut out);
                }
            }
            ProviderEvent::ToolCall(call) => {
                if self.config.use_structured_calls {
                    self.on_structured_call(call, &mut out);
                } else {
                    tracing::debug!(tool = %call.name, "structured calls disabled; call ignored");
                }
            }
            ProviderEvent::Usage(usage) => self.usage.merge(&usage),
            ProviderEvent::Finish(reason) => self.stop_reason = Some(reason),
        }
        out
    }

    fn on_text(&mut self, delta: &str, out: &mut Vec<StreamChunk>) {
        let Some(detector) = self.detector.as_mut() else {
            self.text.push_str(delta);
            out.push(StreamChunk::content(delta));
            return;
        };

        let base = detector.buffered_len();
        let found = detector.push(delta);
        let (requests, limit_end) = self.tagged_requests(found);
        let visible = limit_end
            .map_or(delta.len(), |end| end.saturating_sub(base).min(delta.len()));

        let shown = &delta[..visible];
        if !shown.is_empty() {
            self.text.push_str(shown);
            out.push(StreamChunk::content(shown));
        }
        for request in requests {
            self.accept(request, out);
        }
    }

    /// Turn detected blocks into requests, stopping at the tagged call limit.
    ///
    /// The second value is the end offset of the block that hit the limit.
    fn tagged_requests(
        &mut self,
        found: Vec<DetectedTag>,
    ) -> (Vec<ToolInvocationRequest>, Option<usize>) {
        let mut requests = Vec::new();
        let mut terminating = self.terminating;

        for detected in found {
            if terminating
                && self.config.termination_policy == TerminationPolicy::IgnoreRemainingCalls
            {
                tracing::debug!(tag = %detected.tag, "call after turn-ending tool ignored");
                continue;
            }
            let Some(function) = self.registry.lookup_by_tag(&detected.tag) else {
                continue;
            };
            let args = extract_arguments(&detected, &function.schema);
            requests.push(ToolInvocationRequest::tagged(
                function.schema.name.clone(),
                detected.tag.clone(),
                args,
            ));
            self.tagged_count += 1;
            terminating |= is_terminating_tool(&function.schema.name);
            if self.config.tagged_limit_reached(self.tagged_count) {
                self.limit_hit = true;
                return (requests, Some(detected.end));
            }
        }
        (requests, None)
    }

    /// End of text: settle openers the model never closed.
    fn flush_tagged(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        let Some(detector) = self.detector.as_mut() else {
            return out;
        };
        let (found, abandoned) = detector.finish();
        if !abandoned.is_empty() {
            tracing::debug!(?abandoned, "unclosed tags treated as text");
        }
        let (requests, _) = self.tagged_requests(found);
        for request in requests {
            self.accept(request, &mut out);
        }
        out
    }

    fn on_structured_call(&mut self, call: ToolCall, out: &mut Vec<StreamChunk>) {
        if self.limit_hit || self.ignoring_calls() {
            tracing::debug!(tool = %call.name, "structured call ignored");
            return;
        }
        self.structured_calls.push(call.clone());
        self.accept(
            ToolInvocationRequest::structured(call.id, call.name, call.arguments),
            out,
        );
    }

    fn flush_structured(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if !self.config.use_structured_calls {
            return out;
        }
        for call in self.structured.finish() {
            self.on_structured_call(call, &mut out);
        }
        out
    }

    /// Surface a request and hand it to the coordinator.
    fn accept(&mut self, request: ToolInvocationRequest, out: &mut Vec<StreamChunk>) {
        out.push(StreamChunk::ToolCallRequest {
            request: request.clone(),
        });
        self.surfaced += 1;

        if !self.terminating && is_terminating_tool(&request.tool_name) {
            self.terminating = true;
            out.push(StreamChunk::status(
                StatusUpdate::new(StatusKind::TerminationPending)
                    .with_message(format!("'{}' ends the turn", request.tool_name))
                    .with_metadata(serde_json::json!({
                        "agent_should_terminate": true,
                        "tool_name": request.tool_name,
                        "call_id": request.call_id,
                    })),
            ));
        }

        if let Some(session) = self.session.as_mut() {
            if self.config.execute_on_stream {
                session.dispatch(request);
            } else {
                self.deferred.push(request);
            }
        }
    }

    fn dispatch_deferred(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for request in self.deferred.drain(..) {
            session.dispatch(request);
        }
    }

    fn finish_reason(&self) -> FinishReason {
        if self.limit_hit {
            return FinishReason::XmlToolLimitReached;
        }
        match self.stop_reason {
            Some(ProviderStopReason::ToolCalls) => FinishReason::ToolCalls,
            Some(ProviderStopReason::Length) => FinishReason::Length,
            _ if self.surfaced > 0 && self.config.execute_tools => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }

    /// Append the assistant message, then every tool result in yield order.
    async fn persist(&self, turn: &TurnContext) -> Result<(), RuntimeError> {
        if !self.text.is_empty() || !self.structured_calls.is_empty() {
            let mut message = NewMessage::chat(
                MessageKind::Assistant,
                ChatMessage::assistant_with_calls(self.text.clone(), self.structured_calls.clone()),
            );
            message.metadata = serde_json::json!({
                "usage": self.usage,
                "stop_reason": self.stop_reason,
            });
            turn.store.append(turn.thread_id, message).await?;
        }
        for result in &self.results {
            turn.store
                .append(turn.thread_id, NewMessage::tool_result(result))
                .await?;
        }
        tracing::debug!(
            thread_id = %turn.thread_id,
            results = self.results.len(),
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            "response persisted"
        );
        Ok(())
    }
}
