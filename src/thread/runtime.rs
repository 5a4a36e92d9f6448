//! Thread runtime loop with bounded auto-continue.
//!
//! One turn moves through
//! `Preparing -> CallingProvider -> Interpreting -> (Done | Continuing)`, looping
//! back to `Preparing` on continue, or ends in `Terminated` on any failure.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use strum::Display;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfiguration;
use crate::context::ContextCompressor;
use crate::error::RuntimeError;
use crate::executor::ToolExecutor;
use crate::interpreter::{ResponseInterpreter, TurnContext};
use crate::observe::{emit, ObservabilitySink, RuntimeEvent, RuntimeEventKind};
use crate::provider::{ModelProvider, ProviderRequest};
use crate::tools::{DynamicToolProvider, ToolRegistry};
use crate::types::{
    ChatMessage, FinishReason, GenerationSettings, Role, StatusKind, StatusUpdate, StreamChunk,
    ThreadId, ToolChoice,
};

use super::store::ThreadStore;

/// Phases of a turn, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TurnPhase {
    Preparing,
    CallingProvider,
    Interpreting,
    Continuing,
    Done,
    Terminated,
}

/// Request payload to run one turn.
///
/// The user message that starts the turn must already be in the thread.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: ThreadId,
    pub model: String,
    pub system_prompt: String,
    pub config: RunConfiguration,
    pub settings: GenerationSettings,
    /// Spliced in before the last user message on the first provider call
    /// only; never persisted.
    pub ephemeral: Option<ChatMessage>,
    pub cancel: Option<CancellationToken>,
}

impl TurnRequest {
    pub fn new(thread_id: ThreadId, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            thread_id,
            model: model.into(),
            system_prompt: system_prompt.into(),
            config: RunConfiguration::default(),
            settings: GenerationSettings::default(),
            ephemeral: None,
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: RunConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_ephemeral(mut self, message: ChatMessage) -> Self {
        self.ephemeral = Some(message);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Drives turns for threads against one provider, store and registry.
#[derive(Clone)]
pub struct ThreadRuntime {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn ThreadStore>,
    registry: Arc<ToolRegistry>,
    compressor: ContextCompressor,
    sink: Option<Arc<dyn ObservabilitySink>>,
}

impl std::fmt::Debug for ThreadRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRuntime")
            .field("provider", &self.provider.provider_name())
            .field("tools", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ThreadRuntime {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn ThreadStore>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            store,
            registry,
            compressor: ContextCompressor::default(),
            sink: None,
        }
    }

    pub fn with_compressor(mut self, compressor: ContextCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Discover and register tools from an external protocol adapter.
    /// They are offered to the model from the next provider call on.
    pub async fn register_dynamic(
        &self,
        provider: Arc<dyn DynamicToolProvider>,
    ) -> Result<usize, RuntimeError> {
        self.registry.register_dynamic(provider).await
    }

    /// Run one turn.
    ///
    /// Configuration errors are returned before any provider call; every
    /// later failure is reported inside the stream, which always ends with a
    /// terminal chunk.
    pub fn run_turn(
        &self,
        request: TurnRequest,
    ) -> Result<BoxStream<'static, StreamChunk>, RuntimeError> {
        request.config.validate()?;
        if request.model.trim().is_empty() {
            return Err(RuntimeError::Configuration("model must not be empty".into()));
        }
        let driver = TurnDriver {
            runtime: self.clone(),
            request,
        };
        Ok(driver.run())
    }
}

struct TurnDriver {
    runtime: ThreadRuntime,
    request: TurnRequest,
}

enum Pulled {
    Chunk(Option<StreamChunk>),
    Cancelled,
}

impl TurnDriver {
    fn run(self) -> BoxStream<'static, StreamChunk> {
        let stream = async_stream::stream! {
            let thread_id = self.request.thread_id;
            let config = self.request.config.clone();
            let max_continues = config.max_auto_continues;
            let mut continues = 0usize;
            let mut provider_calls = 0usize;

            self.record(RuntimeEventKind::TurnStarted, serde_json::json!({
                "model": self.request.model,
                "max_auto_continues": max_continues,
            }));

            let outcome = 'turn: loop {
                if self.is_cancelled() {
                    yield StreamChunk::error_status("turn cancelled");
                    yield StreamChunk::finish_with_error("turn cancelled");
                    break 'turn TurnPhase::Terminated;
                }

                tracing::debug!(%thread_id, phase = %TurnPhase::Preparing, continues, "turn step");
                let provider_request = match self.prepare(provider_calls == 0).await {
                    Ok(request) => request,
                    Err(err) => {
                        tracing::warn!(%thread_id, error = %err, "failed to prepare provider call");
                        yield StreamChunk::error_status(err.to_string());
                        yield StreamChunk::finish_with_error(err.to_string());
                        break 'turn TurnPhase::Terminated;
                    }
                };

                tracing::debug!(
                    %thread_id,
                    phase = %TurnPhase::CallingProvider,
                    messages = provider_request.messages.len(),
                    tools = provider_request.tools.as_ref().map_or(0, Vec::len),
                    "turn step"
                );
                provider_calls += 1;
                let output = match self.runtime.provider.call(&provider_request).await {
                    Ok(output) => output,
                    Err(err) => {
                        tracing::warn!(%thread_id, error = %err, "provider call failed");
                        self.record(RuntimeEventKind::ProviderError, serde_json::json!({
                            "error": err.to_string(),
                            "category": format!("{:?}", err.category()),
                            "phase": "call",
                        }));
                        yield StreamChunk::error_status(err.to_string());
                        yield StreamChunk::finish_with_error(err.to_string());
                        break 'turn TurnPhase::Terminated;
                    }
                };

                tracing::debug!(%thread_id, phase = %TurnPhase::Interpreting, "turn step");
                let mut chunks = self.interpreter().interpret(output);
                let mut finish: Option<FinishReason> = None;
                let mut termination = false;

                loop {
                    let pulled = match &self.request.cancel {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => Pulled::Cancelled,
                            chunk = chunks.next() => Pulled::Chunk(chunk),
                        },
                        None => Pulled::Chunk(chunks.next().await),
                    };
                    let chunk = match pulled {
                        Pulled::Chunk(Some(chunk)) => chunk,
                        Pulled::Chunk(None) => break,
                        Pulled::Cancelled => {
                            yield StreamChunk::error_status("turn cancelled");
                            yield StreamChunk::finish_with_error("turn cancelled");
                            break 'turn TurnPhase::Terminated;
                        }
                    };
                    match &chunk {
                        StreamChunk::Status { status } if status.signals_termination() => {
                            termination = true;
                            self.record(RuntimeEventKind::TerminationDetected, status.metadata.clone());
                        }
                        StreamChunk::Finish { reason, .. } => finish = Some(*reason),
                        _ => {}
                    }
                    yield chunk;
                }

                match finish {
                    Some(FinishReason::Error) | None => break 'turn TurnPhase::Terminated,
                    Some(FinishReason::ToolCalls)
                        if config.execute_tools && config.auto_continue_enabled() && !termination =>
                    {
                        if continues >= max_continues {
                            tracing::debug!(%thread_id, max_continues, "auto-continue limit reached");
                            yield StreamChunk::content(format!(
                                "\n[Reached the limit of {max_continues} automatic continuations; stopping here.]"
                            ));
                            break 'turn TurnPhase::Done;
                        }
                        continues += 1;
                        tracing::debug!(%thread_id, phase = %TurnPhase::Continuing, continues, "turn step");
                        yield StreamChunk::status(
                            StatusUpdate::new(StatusKind::AutoContinue).with_metadata(serde_json::json!({
                                "continue": continues,
                                "max_auto_continues": max_continues,
                            })),
                        );
                    }
                    Some(_) => break 'turn TurnPhase::Done,
                }
            };

            tracing::debug!(%thread_id, phase = %outcome, provider_calls, continues, "turn ended");
            self.record(RuntimeEventKind::TurnEnded, serde_json::json!({
                "outcome": outcome.to_string(),
                "provider_calls": provider_calls,
                "continues": continues,
            }));
        };
        Box::pin(stream)
    }

    fn is_cancelled(&self) -> bool {
        self.request
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn record(&self, kind: RuntimeEventKind, metadata: serde_json::Value) {
        emit(
            &self.runtime.sink,
            RuntimeEvent::new(kind, self.request.thread_id, metadata),
        );
    }

    fn interpreter(&self) -> ResponseInterpreter {
        let runtime = &self.runtime;
        let executor = ToolExecutor::new(runtime.registry.clone())
            .with_sink(runtime.sink.clone())
            .with_timeout(self.request.config.tool_timeout_ms.map(Duration::from_millis))
            .for_thread(self.request.thread_id);
        ResponseInterpreter::new(
            runtime.registry.clone(),
            executor,
            self.request.config.clone(),
            TurnContext {
                thread_id: self.request.thread_id,
                store: runtime.store.clone(),
                sink: runtime.sink.clone(),
            },
        )
    }

    /// Build the provider request from the thread's current history.
    async fn prepare(&self, first_call: bool) -> Result<ProviderRequest, RuntimeError> {
        let request = &self.request;
        let runtime = &self.runtime;

        let history: Vec<ChatMessage> = runtime
            .store
            .list_llm_visible_messages(request.thread_id)
            .await?
            .iter()
            .filter_map(|m| m.to_chat())
            .collect();

        let mut system_prompt = request.system_prompt.clone();
        if request.config.use_tagged_syntax {
            if let Some(section) = runtime.registry.tagged_prompt_section() {
                if !system_prompt.is_empty() {
                    system_prompt.push_str("\n\n");
                }
                system_prompt.push_str(&section);
            }
        }
        let system = ChatMessage::system(system_prompt);

        let compressed = runtime.compressor.compress(&system, &history, &request.model);
        if compressed.messages.len() != history.len() || compressed.overflowed {
            tracing::debug!(
                thread_id = %request.thread_id,
                before = history.len(),
                after = compressed.messages.len(),
                used_tokens = compressed.used_tokens,
                budget = compressed.budget,
                "history compressed"
            );
        }

        let mut messages = Vec::with_capacity(compressed.messages.len() + 2);
        messages.push(system);
        messages.extend(compressed.messages);

        if first_call {
            if let Some(ephemeral) = &request.ephemeral {
                let at = messages
                    .iter()
                    .rposition(|m| m.role == Role::User && !m.is_tool_result())
                    .unwrap_or(messages.len());
                messages.insert(at, ephemeral.clone());
            }
        }

        let tools = (request.config.use_structured_calls && !runtime.registry.is_empty())
            .then(|| runtime.registry.all_structured_schemas());
        let tool_choice = tools
            .as_ref()
            .map(|_| request.settings.tool_choice.unwrap_or(ToolChoice::Auto));

        Ok(ProviderRequest {
            model: request.model.clone(),
            messages,
            tools,
            tool_choice,
            stream: request.settings.wants_stream(),
            settings: request.settings.clone(),
        })
    }
}
