//! Provider for any OpenAI-compatible Chat Completions API.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::RuntimeError;
use crate::types::{ChatMessage, Role, ToolCall, Usage};

use super::http::{bearer_headers, parse_sse_data, shared_client, status_to_error};
use super::{ModelProvider, ProviderEvent, ProviderOutput, ProviderRequest, ProviderResponse, ProviderStopReason};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const ENV_API_KEY: &str = "OPENAI_API_KEY";
const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

/// Chat Completions client; works against OpenAI, OpenRouter, vLLM,
/// LM Studio and similar servers.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name: "openai-compatible".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Configure from `OPENAI_API_KEY` / `OPENAI_BASE_URL` (a `.env` file is honoured).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let base_url = std::env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, std::env::var(ENV_API_KEY).ok())
    }

    /// Name reported in logs and provider errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn build_request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::Map::new();
        body.insert("model".into(), request.model.clone().into());
        body.insert("messages".into(), messages.into());
        body.insert("stream".into(), request.stream.into());
        if request.stream {
            body.insert("stream_options".into(), serde_json::json!({"include_usage": true}));
        }

        let settings = &request.settings;
        if let Some(max) = settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(ref stops) = settings.stop_sequences {
            body.insert("stop".into(), serde_json::json!(stops));
        }

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body.insert("tools".into(), tools.clone().into());
            if let Some(choice) = request.tool_choice {
                body.insert("tool_choice".into(), choice.to_string().into());
            }
        }

        serde_json::Value::Object(body)
    }

    async fn send(&self, request: &ProviderRequest) -> Result<reqwest::Response, RuntimeError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            provider = %self.name,
            model = %request.model,
            stream = request.stream,
            messages = request.messages.len(),
            "chat completions request"
        );

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(self.api_key.as_deref()))
            .json(&self.build_request_body(request))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &ProviderRequest) -> Result<ProviderOutput, RuntimeError> {
        let resp = self.send(request).await?;

        if !request.stream {
            let data: WireResponse = resp.json().await?;
            let choice = data
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| RuntimeError::provider(&self.name, "response has no choices"))?;
            let tool_calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: parse_arguments(tc.function.arguments),
                })
                .collect();
            return Ok(ProviderOutput::Complete(ProviderResponse {
                text: choice.message.content.unwrap_or_default(),
                tool_calls,
                stop_reason: choice
                    .finish_reason
                    .as_deref()
                    .and_then(ProviderStopReason::from_wire),
                usage: data.usage.map(WireUsage::into_usage).unwrap_or_default(),
            }));
        }

        let byte_stream = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(RuntimeError::Network(e));
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    match serde_json::from_str::<WireStreamChunk>(data) {
                        Ok(chunk) => {
                            for event in chunk_events(chunk) {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(RuntimeError::Stream(format!("malformed stream chunk: {e}")));
                            return;
                        }
                    }
                }
            }
        };

        Ok(ProviderOutput::Stream(Box::pin(stream)))
    }
}

/// Unparseable arguments are passed on as a string so validation reports them.
fn parse_arguments(raw: String) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
}

fn chunk_events(chunk: WireStreamChunk) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    let mut finish = None;
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(ProviderEvent::TextDelta(text));
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            events.push(ProviderEvent::ToolCallDelta {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            finish = ProviderStopReason::from_wire(reason).or(finish);
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(ProviderEvent::Usage(usage.into_usage()));
    }
    if let Some(reason) = finish {
        events.push(ProviderEvent::Finish(reason));
    }
    events
}

fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    match msg.role {
        Role::System => serde_json::json!({ "role": "system", "content": msg.content }),
        Role::User => serde_json::json!({ "role": "user", "content": msg.content }),
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        }),
        Role::Assistant if msg.tool_calls.is_empty() => {
            serde_json::json!({ "role": "assistant", "content": msg.content })
        }
        Role::Assistant => {
            let calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(msg.content.clone())
            };
            serde_json::json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
    }
}

// Chat Completions wire types (internal)

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationSettings;

    fn request(stream: bool) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![
                ChatMessage::system("sys"),
                ChatMessage::assistant_with_calls(
                    "",
                    vec![ToolCall {
                        id: "c1".into(),
                        name: "ls".into(),
                        arguments: serde_json::json!({"path": "."}),
                    }],
                ),
                ChatMessage::tool("c1", "ls", "a.txt"),
            ],
            tools: Some(vec![serde_json::json!({"type": "function"})]),
            tool_choice: Some(crate::types::ToolChoice::Auto),
            stream,
            settings: GenerationSettings::builder().temperature(0.2).build(),
        }
    }

    #[test]
    fn request_body_encodes_calls_results_and_tools() {
        let provider = OpenAiCompatibleProvider::new("http://localhost/v1/", None);
        let body = provider.build_request_body(&request(true));

        assert_eq!(body["messages"][1]["content"], serde_json::Value::Null);
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"path\":\".\"}");
        assert_eq!(body["messages"][2]["tool_call_id"], "c1");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(provider.base_url, "http://localhost/v1");
    }

    #[test]
    fn stream_chunk_yields_deltas_then_finish() {
        let chunk: WireStreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hi","tool_calls":[{"index":0,"id":"c1","function":{"name":"ls","arguments":"{\"pa"}}]},"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        let events = chunk_events(chunk);
        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta("hi".into()),
                ProviderEvent::ToolCallDelta {
                    index: 0,
                    id: Some("c1".into()),
                    name: Some("ls".into()),
                    arguments: "{\"pa".into(),
                },
                ProviderEvent::Finish(ProviderStopReason::ToolCalls),
            ]
        );
    }

    #[test]
    fn malformed_arguments_survive_as_string() {
        assert_eq!(parse_arguments(String::new()), serde_json::json!({}));
        assert_eq!(parse_arguments("{\"a\":1}".into()), serde_json::json!({"a": 1}));
        assert_eq!(parse_arguments("{oops".into()), serde_json::json!("{oops"));
    }
}
