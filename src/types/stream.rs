//! Chunks emitted while a turn is interpreted.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::tool_call::{ToolInvocationRequest, ToolInvocationResult};

/// Why a response finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    XmlToolLimitReached,
    Length,
    Error,
}

/// Kind of a status chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusKind {
    /// A turn-ending tool was detected; the turn will not auto-continue.
    TerminationPending,
    /// Tool results were recorded and the runtime is calling the provider again.
    AutoContinue,
    Error,
}

/// Payload of a status chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub kind: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StatusUpdate {
    pub fn new(kind: StatusKind) -> Self {
        Self {
            kind,
            message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this status carries the explicit termination signal.
    pub fn signals_termination(&self) -> bool {
        self.kind == StatusKind::TerminationPending
            && self
                .metadata
                .get("agent_should_terminate")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
    }
}

/// One item of interpreted output, delivered to the caller in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    ContentDelta {
        text: String,
    },
    ToolCallRequest {
        request: ToolInvocationRequest,
    },
    ToolResult {
        result: ToolInvocationResult,
    },
    Status {
        status: StatusUpdate,
    },
    Finish {
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn status(status: StatusUpdate) -> Self {
        Self::Status { status }
    }

    pub fn error_status(message: impl Into<String>) -> Self {
        Self::Status {
            status: StatusUpdate::new(StatusKind::Error).with_message(message),
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish {
            reason,
            error: None,
        }
    }

    pub fn finish_with_error(message: impl Into<String>) -> Self {
        Self::Finish {
            reason: FinishReason::Error,
            error: Some(message.into()),
        }
    }

    /// The finish reason, if this is a finish chunk.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self {
            Self::Finish { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether this chunk ends a turn from the caller's point of view.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Finish { .. } => true,
            Self::Status { status } => status.kind == StatusKind::Error,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_uses_wire_names() {
        assert_eq!(FinishReason::XmlToolLimitReached.to_string(), "xml_tool_limit_reached");
        assert_eq!(
            "tool_calls".parse::<FinishReason>().ok(),
            Some(FinishReason::ToolCalls)
        );
        let json = serde_json::to_value(StreamChunk::finish(FinishReason::Stop)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "finish", "reason": "stop"}));
    }

    #[test]
    fn termination_signal_requires_explicit_flag() {
        let bare = StatusUpdate::new(StatusKind::TerminationPending);
        assert!(!bare.signals_termination());
        let flagged = bare.with_metadata(serde_json::json!({"agent_should_terminate": true}));
        assert!(flagged.signals_termination());
    }
}
