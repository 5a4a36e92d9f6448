//! Shared test helpers and mock provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use threadloop::config::RunConfiguration;
use threadloop::error::RuntimeError;
use threadloop::provider::{
    ModelProvider, ProviderEvent, ProviderOutput, ProviderRequest, ProviderResponse,
    ProviderStopReason,
};
use threadloop::tools::{
    FnTool, StructuredSchema, TaggedSchema, Tool, ToolOutput, ToolRegistry, ToolSchema,
};
use threadloop::types::*;

/// One scripted provider reply.
pub enum Scripted {
    Response(ProviderResponse),
    /// Streamed events; an `Err` entry fails the stream at that point.
    Events(Vec<Result<ProviderEvent, String>>),
    /// The call itself fails.
    Fail(String),
}

/// A mock provider that replays queued replies and records requests.
///
/// Once the queue is empty every call answers "done" with a normal stop.
#[derive(Default)]
pub struct MockProvider {
    replies: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Scripted) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Queue a text response.
    pub fn queue_text(&self, text: &str) -> &Self {
        self.push(Scripted::Response(ProviderResponse {
            text: text.to_string(),
            stop_reason: Some(ProviderStopReason::Stop),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            },
            ..Default::default()
        }))
    }

    /// Queue a structured tool call response.
    pub fn queue_tool_call(&self, id: &str, name: &str, args: serde_json::Value) -> &Self {
        self.push(Scripted::Response(ProviderResponse {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args,
            }],
            stop_reason: Some(ProviderStopReason::ToolCalls),
            usage: Usage::default(),
        }))
    }

    /// Queue a streamed text response split into the given fragments.
    pub fn queue_fragments(&self, fragments: &[&str]) -> &Self {
        let mut events: Vec<Result<ProviderEvent, String>> = fragments
            .iter()
            .map(|f| Ok(ProviderEvent::TextDelta(f.to_string())))
            .collect();
        events.push(Ok(ProviderEvent::Finish(ProviderStopReason::Stop)));
        self.push(Scripted::Events(events))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn call(&self, request: &ProviderRequest) -> Result<ProviderOutput, RuntimeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Ok(ProviderOutput::Complete(ProviderResponse {
                text: "done".to_string(),
                stop_reason: Some(ProviderStopReason::Stop),
                ..Default::default()
            })),
            Some(Scripted::Response(response)) => Ok(ProviderOutput::Complete(response)),
            Some(Scripted::Events(events)) => {
                let events = events
                    .into_iter()
                    .map(|e| e.map_err(RuntimeError::Stream));
                Ok(ProviderOutput::Stream(futures::stream::iter(events).boxed()))
            }
            Some(Scripted::Fail(message)) => Err(RuntimeError::provider("mock", message)),
        }
    }
}

/// Structured-only configuration.
pub fn structured_config() -> RunConfiguration {
    RunConfiguration {
        use_tagged_syntax: false,
        use_structured_calls: true,
        ..RunConfiguration::default()
    }
}

/// `get_weather(city)`: structured only.
pub fn weather_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolSchema::new(
            "get_weather",
            "Current weather for a city",
            StructuredSchema::object().string("city", "City name", true).build(),
        ),
        |args, _ctx| async move {
            let city = args.get_str("city")?;
            Ok(ToolOutput::success(format!("Sunny in {city}")))
        },
    ))
}

/// `create_file(path, content)`, also written as `<create-file path="..">content</create-file>`.
pub fn create_file_tool(written: Arc<Mutex<Vec<(String, String)>>>) -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolSchema::new(
            "create_file",
            "Create a file",
            StructuredSchema::object()
                .string("path", "File path", true)
                .string("content", "File contents", true)
                .build(),
        )
        .with_tagged(
            TaggedSchema::new("create-file")
                .attribute("path")
                .content("content")
                .example("<create-file path=\"notes.txt\">text</create-file>"),
        ),
        move |args, _ctx| {
            let written = written.clone();
            async move {
                let path = args.get_str("path")?.to_string();
                let content = args.get_str("content")?.to_string();
                written.lock().unwrap().push((path.clone(), content));
                Ok(ToolOutput::success(format!("created {path}")))
            }
        },
    ))
}

/// `complete()`: the turn-ending tool, tag `<complete>`.
pub fn complete_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolSchema::new("complete", "Finish the task", StructuredSchema::empty()).with_tagged(
            TaggedSchema::new("complete").example("<complete></complete>"),
        ),
        |_args, _ctx| async move { Ok(ToolOutput::success("completed")) },
    ))
}

pub fn registry_with(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool, None).unwrap();
    }
    Arc::new(registry)
}

pub async fn collect(stream: futures::stream::BoxStream<'static, StreamChunk>) -> Vec<StreamChunk> {
    stream.collect().await
}

pub fn content_of(chunks: &[StreamChunk]) -> String {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::ContentDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn finishes(chunks: &[StreamChunk]) -> Vec<FinishReason> {
    chunks.iter().filter_map(StreamChunk::finish_reason).collect()
}

pub fn requests_of(chunks: &[StreamChunk]) -> Vec<ToolInvocationRequest> {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::ToolCallRequest { request } => Some(request.clone()),
            _ => None,
        })
        .collect()
}

pub fn results_of(chunks: &[StreamChunk]) -> Vec<ToolInvocationResult> {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::ToolResult { result } => Some(result.clone()),
            _ => None,
        })
        .collect()
}

pub fn statuses_of(chunks: &[StreamChunk], kind: StatusKind) -> Vec<StatusUpdate> {
    chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Status { status } if status.kind == kind => Some(status.clone()),
            _ => None,
        })
        .collect()
}
