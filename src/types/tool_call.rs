//! Tool invocation requests and results.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::ToolCall;

/// Which syntax a tool call was expressed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallOrigin {
    /// Native provider function call.
    Structured,
    /// Inline tag embedded in assistant text.
    Tagged,
}

/// A tool call detected in a model response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationRequest {
    pub call_id: String,
    /// Structured function name the call resolves to.
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub origin: CallOrigin,
    /// Tag the call was written with, for tagged calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
}

impl ToolInvocationRequest {
    /// A request from a native function call.
    pub fn structured(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            origin: CallOrigin::Structured,
            tag_name: None,
        }
    }

    /// A request parsed from an inline tag.
    pub fn tagged(
        tool_name: impl Into<String>,
        tag_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: format!("tag_{}", uuid::Uuid::new_v4().simple()),
            tool_name: tool_name.into(),
            arguments,
            origin: CallOrigin::Tagged,
            tag_name: Some(tag_name.into()),
        }
    }

    /// The assistant-message form, for structured calls.
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.call_id.clone(),
            name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub output: serde_json::Value,
    /// Set when the invoked tool ends the turn (ask, complete, hand-off).
    pub is_terminating: bool,
    pub origin: CallOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
}

impl ToolInvocationResult {
    /// A successful result for `request`.
    pub fn success(request: &ToolInvocationRequest, output: serde_json::Value) -> Self {
        Self::from_request(request, true, output)
    }

    /// A failed result for `request` carrying `message` as output.
    pub fn failure(request: &ToolInvocationRequest, message: impl Into<String>) -> Self {
        Self::from_request(request, false, serde_json::Value::String(message.into()))
    }

    pub(crate) fn from_request(
        request: &ToolInvocationRequest,
        success: bool,
        output: serde_json::Value,
    ) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            success,
            output,
            is_terminating: crate::tools::is_terminating_tool(&request.tool_name),
            origin: request.origin,
            tag_name: request.tag_name.clone(),
        }
    }
}
