//! Model provider contract and an OpenAI-compatible implementation.

pub mod http;

#[cfg(feature = "openai-compatible")]
pub mod openai_compatible;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::RuntimeError;
use crate::types::{ChatMessage, GenerationSettings, ToolCall, ToolChoice, Usage};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Function definitions for structured calls; `None` when disabled.
    pub tools: Option<Vec<serde_json::Value>>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    pub settings: GenerationSettings,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderStopReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

impl ProviderStopReason {
    /// Map a chat-completions `finish_reason` string.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "stop" | "end_turn" | "stop_sequence" => Some(Self::Stop),
            "tool_calls" | "function_call" | "tool_use" => Some(Self::ToolCalls),
            "length" | "max_tokens" => Some(Self::Length),
            "content_filter" => Some(Self::ContentFilter),
            _ => None,
        }
    }
}

/// A complete, non-streamed provider response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<ProviderStopReason>,
    pub usage: Usage,
}

/// One incremental provider event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    /// A fragment of a structured call; fragments share `index`.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// A fully formed structured call.
    ToolCall(ToolCall),
    Usage(Usage),
    Finish(ProviderStopReason),
}

/// What a provider call produced.
pub enum ProviderOutput {
    Complete(ProviderResponse),
    Stream(BoxStream<'static, Result<ProviderEvent, RuntimeError>>),
}

impl std::fmt::Debug for ProviderOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl ProviderOutput {
    /// View any output as an event stream; a complete response becomes a
    /// short replay of text, calls, usage and stop reason.
    pub fn into_events(self) -> BoxStream<'static, Result<ProviderEvent, RuntimeError>> {
        match self {
            Self::Stream(stream) => stream,
            Self::Complete(response) => {
                let mut events = Vec::new();
                if !response.text.is_empty() {
                    events.push(Ok(ProviderEvent::TextDelta(response.text)));
                }
                events.extend(response.tool_calls.into_iter().map(|c| Ok(ProviderEvent::ToolCall(c))));
                if response.usage != Usage::default() {
                    events.push(Ok(ProviderEvent::Usage(response.usage)));
                }
                if let Some(reason) = response.stop_reason {
                    events.push(Ok(ProviderEvent::Finish(reason)));
                }
                Box::pin(futures::stream::iter(events))
            }
        }
    }
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name, used in logs and error payloads.
    fn provider_name(&self) -> &str;

    /// Issue one call; streaming or not according to `request.stream`.
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderOutput, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn complete_response_replays_as_events() {
        let output = ProviderOutput::Complete(ProviderResponse {
            text: "hi".into(),
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                name: "ls".into(),
                arguments: serde_json::json!({}),
            }],
            stop_reason: Some(ProviderStopReason::ToolCalls),
            usage: Usage::default(),
        });
        let events: Vec<ProviderEvent> = output
            .into_events()
            .map(|e| e.expect("replay never fails"))
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ProviderEvent::TextDelta("hi".into()));
        assert_eq!(events[2], ProviderEvent::Finish(ProviderStopReason::ToolCalls));
    }

    #[test]
    fn wire_stop_reasons_are_normalized() {
        assert_eq!(ProviderStopReason::from_wire("tool_use"), Some(ProviderStopReason::ToolCalls));
        assert_eq!(ProviderStopReason::from_wire("max_tokens"), Some(ProviderStopReason::Length));
        assert_eq!(ProviderStopReason::from_wire("weird"), None);
    }
}
