//! Token counting for context budgeting.

use crate::types::ChatMessage;

/// Counts the tokens a message list occupies for a model.
///
/// Implementations must be deterministic: the compressor relies on the same
/// input always producing the same count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, model: &str, messages: &[ChatMessage]) -> usize;
}

/// Character-based estimate, roughly four characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

const MESSAGE_OVERHEAD: usize = 4;
const TOOL_CALL_OVERHEAD: usize = 8;

pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let mut tokens = MESSAGE_OVERHEAD + estimate_text_tokens(&message.content);
    for call in &message.tool_calls {
        let args = serde_json::to_string(&call.arguments).unwrap_or_default();
        tokens += estimate_text_tokens(&call.id)
            + estimate_text_tokens(&call.name)
            + estimate_text_tokens(&args)
            + TOOL_CALL_OVERHEAD;
    }
    if let Some(id) = &message.tool_call_id {
        tokens += estimate_text_tokens(id);
    }
    if let Some(name) = &message.name {
        tokens += estimate_text_tokens(name);
    }
    tokens
}

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, _model: &str, messages: &[ChatMessage]) -> usize {
        messages.iter().map(estimate_message_tokens).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    #[test]
    fn text_estimate_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abc"), 1);
        assert_eq!(estimate_text_tokens("abcdefghi"), 3);
    }

    #[test]
    fn tool_calls_add_to_the_message_estimate() {
        let plain = ChatMessage::assistant("ok");
        let with_call = ChatMessage::assistant_with_calls(
            "ok",
            vec![ToolCall {
                id: "call_1".into(),
                name: "ls".into(),
                arguments: serde_json::json!({"path": "."}),
            }],
        );
        assert_eq!(estimate_message_tokens(&plain), 5);
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain) + 8);
    }
}
