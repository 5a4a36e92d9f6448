//! Thread messages and their provider-facing form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tool_call::{CallOrigin, ToolInvocationResult};

/// Identifier of a thread.
pub type ThreadId = Uuid;

/// Identifier of a stored message.
pub type MessageId = Uuid;

/// Kind of a persisted message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    Tool,
    Status,
    System,
}

/// Conversation role understood by providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured tool call carried on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Model-agnostic chat message sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Marks messages the context compressor must keep.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            pinned: false,
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    /// Create an assistant message carrying structured tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, text)
        }
    }

    /// Create a tool result message answering a structured call.
    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    /// Create a tagged tool result. It travels as a user message; the call id
    /// is kept locally and never sent to the provider.
    pub fn tagged_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(Role::User, content)
        }
    }

    /// Whether this message answers a tool call in either syntax.
    pub fn is_tool_result(&self) -> bool {
        self.tool_call_id.is_some() && matches!(self.role, Role::Tool | Role::User)
    }

    /// Mark this message as pinned for context compression.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Payload of a persisted message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// A message the model sees.
    Chat(ChatMessage),
    /// Anything else (status records, bookkeeping).
    Data { value: serde_json::Value },
}

/// A stored message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub kind: MessageKind,
    pub content: MessageContent,
    pub is_llm_message: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The provider-facing form, if this message is visible to the model.
    pub fn to_chat(&self) -> Option<ChatMessage> {
        if !self.is_llm_message {
            return None;
        }
        match &self.content {
            MessageContent::Chat(chat) => Some(chat.clone()),
            MessageContent::Data { .. } => None,
        }
    }
}

/// A message to append; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub content: MessageContent,
    pub is_llm_message: bool,
    pub metadata: serde_json::Value,
}

impl NewMessage {
    /// A model-visible message.
    pub fn chat(kind: MessageKind, chat: ChatMessage) -> Self {
        Self {
            kind,
            content: MessageContent::Chat(chat),
            is_llm_message: true,
            metadata: serde_json::Value::Null,
        }
    }

    /// A user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::chat(MessageKind::User, ChatMessage::user(text))
    }

    /// A status record, hidden from the model.
    pub fn status(value: serde_json::Value) -> Self {
        Self {
            kind: MessageKind::Status,
            content: MessageContent::Data { value },
            is_llm_message: false,
            metadata: serde_json::Value::Null,
        }
    }

    /// The thread record for a tool result.
    ///
    /// Structured results answer their call id with a `tool` message. Tagged
    /// results have no provider call id, so they go back as a user message
    /// wrapped in `<tool_result>`.
    pub fn tool_result(result: &ToolInvocationResult) -> Self {
        let output = render_output(&result.output);
        let chat = match result.origin {
            CallOrigin::Structured => {
                ChatMessage::tool(result.call_id.clone(), result.tool_name.clone(), output)
            }
            CallOrigin::Tagged => {
                let tag = result.tag_name.as_deref().unwrap_or(&result.tool_name);
                ChatMessage::tagged_result(
                    result.call_id.clone(),
                    format!(
                        "<tool_result> <{tag}> ToolResult(success={}, output={output}) </{tag}> </tool_result>",
                        if result.success { "True" } else { "False" },
                    ),
                )
            }
        };
        Self {
            kind: MessageKind::Tool,
            content: MessageContent::Chat(chat),
            is_llm_message: true,
            metadata: serde_json::json!({
                "call_id": result.call_id,
                "success": result.success,
                "is_terminating": result.is_terminating,
            }),
        }
    }
}

/// Render a tool output for the model: strings verbatim, everything else as JSON.
pub fn render_output(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(origin: CallOrigin, success: bool) -> ToolInvocationResult {
        ToolInvocationResult {
            call_id: "call-1".into(),
            tool_name: "create_file".into(),
            success,
            output: serde_json::json!("written"),
            is_terminating: false,
            origin,
            tag_name: Some("create-file".into()),
        }
    }

    #[test]
    fn structured_result_answers_its_call_id() {
        let message = NewMessage::tool_result(&result(CallOrigin::Structured, true));
        let MessageContent::Chat(chat) = message.content else {
            panic!("expected chat content");
        };
        assert_eq!(chat.role, Role::Tool);
        assert_eq!(chat.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(chat.content, "written");
    }

    #[test]
    fn tagged_result_is_wrapped_for_the_model() {
        let message = NewMessage::tool_result(&result(CallOrigin::Tagged, false));
        let MessageContent::Chat(chat) = message.content else {
            panic!("expected chat content");
        };
        assert_eq!(chat.role, Role::User);
        assert!(chat.content.starts_with("<tool_result> <create-file>"));
        assert!(chat.content.contains("success=False"));
        assert!(chat.is_tool_result());
        assert!(!ChatMessage::user("hello").is_tool_result());
    }

    #[test]
    fn status_messages_are_hidden_from_the_model() {
        let message = Message {
            id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            kind: MessageKind::Status,
            content: MessageContent::Data {
                value: serde_json::json!({"status": "error"}),
            },
            is_llm_message: false,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        assert!(message.to_chat().is_none());
    }
}
