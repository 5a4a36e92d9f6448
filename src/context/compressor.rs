//! Deterministic context reduction before each provider call.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::budget::{BudgetTable, ModelBudget};
use super::tokens::{HeuristicTokenCounter, TokenCounter};
use crate::error::RuntimeError;
use crate::types::{ChatMessage, Role};

/// Messages longer than this are truncated once the budget is exceeded.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 12_000;

const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Output of [`ContextCompressor::compress`].
#[derive(Debug, Clone, PartialEq)]
pub struct Compressed {
    pub messages: Vec<ChatMessage>,
    /// Tokens of the system message plus `messages`.
    pub used_tokens: usize,
    pub budget: usize,
    /// Nothing more could be removed and the budget is still exceeded.
    pub overflowed: bool,
}

/// Fits a message history into a model's input budget.
///
/// `compress` is pure: it reads nothing but its arguments and the
/// compressor's own settings, and compressing an already compressed list
/// returns it unchanged.
#[derive(Clone)]
pub struct ContextCompressor {
    counter: Arc<dyn TokenCounter>,
    budgets: BudgetTable,
    max_message_chars: usize,
}

impl Default for ContextCompressor {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicTokenCounter))
    }
}

impl std::fmt::Debug for ContextCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCompressor")
            .field("budgets", &self.budgets)
            .field("max_message_chars", &self.max_message_chars)
            .finish()
    }
}

impl ContextCompressor {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            budgets: BudgetTable::default(),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
        }
    }

    pub fn with_budgets(mut self, budgets: BudgetTable) -> Self {
        self.budgets = budgets;
        self
    }

    /// Truncation limit, never shorter than the truncation marker itself.
    pub fn with_max_message_chars(mut self, limit: usize) -> Self {
        self.max_message_chars = limit.max(TRUNCATION_MARKER.chars().count() + 1);
        self
    }

    pub fn budget_for(&self, model: &str) -> ModelBudget {
        self.budgets.resolve(model)
    }

    pub fn compress(
        &self,
        system: &ChatMessage,
        messages: &[ChatMessage],
        model: &str,
    ) -> Compressed {
        let budget = self.budget_for(model).input_budget();
        let mut working = messages.to_vec();

        let used = self.count(model, system, &working);
        if used <= budget {
            return Compressed {
                messages: working,
                used_tokens: used,
                budget,
                overflowed: false,
            };
        }

        let protected = protected_positions(&working);

        // Tool outputs first, then everything else.
        for pass in [TruncationPass::ToolOutputs, TruncationPass::Others] {
            let mut changed = false;
            for (idx, message) in working.iter_mut().enumerate() {
                if protected.contains(&idx) || !pass.applies_to(message) {
                    continue;
                }
                changed |= truncate_content(message, self.max_message_chars);
            }
            if changed {
                let used = self.count(model, system, &working);
                tracing::debug!(model, used, budget, ?pass, "truncated oversized messages");
                if used <= budget {
                    return Compressed {
                        messages: working,
                        used_tokens: used,
                        budget,
                        overflowed: false,
                    };
                }
            }
        }

        let mut used = self.count(model, system, &working);
        let mut dropped = 0usize;
        while used > budget {
            let Some(unit) = oldest_droppable_unit(&working) else {
                break;
            };
            dropped += unit.len();
            for idx in unit.into_iter().rev() {
                working.remove(idx);
            }
            used = self.count(model, system, &working);
        }
        if dropped > 0 {
            tracing::debug!(model, dropped, used, budget, "dropped oldest messages");
        }

        let overflowed = used > budget;
        if overflowed {
            let err = RuntimeError::ContextOverflow {
                used_tokens: used,
                budget,
            };
            tracing::warn!(model, error = %err, "context still over budget; sending best effort");
        }

        Compressed {
            messages: working,
            used_tokens: used,
            budget,
            overflowed,
        }
    }

    fn count(&self, model: &str, system: &ChatMessage, messages: &[ChatMessage]) -> usize {
        self.counter.count(model, std::slice::from_ref(system))
            + self.counter.count(model, messages)
    }
}

#[derive(Debug, Clone, Copy)]
enum TruncationPass {
    ToolOutputs,
    Others,
}

impl TruncationPass {
    fn applies_to(self, message: &ChatMessage) -> bool {
        match self {
            Self::ToolOutputs => message.is_tool_result(),
            Self::Others => !message.is_tool_result(),
        }
    }
}

/// Shorten `message` to exactly `limit` characters, marker included.
fn truncate_content(message: &mut ChatMessage, limit: usize) -> bool {
    if message.content.chars().count() <= limit {
        return false;
    }
    let keep = limit - TRUNCATION_MARKER.chars().count();
    let mut truncated: String = message.content.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    message.content = truncated;
    true
}

/// The most recent user-authored message and the final message.
fn protected_positions(messages: &[ChatMessage]) -> BTreeSet<usize> {
    let mut protected = BTreeSet::new();
    if let Some(idx) = messages
        .iter()
        .rposition(|m| m.role == Role::User && !m.is_tool_result())
    {
        protected.insert(idx);
    }
    if !messages.is_empty() {
        protected.insert(messages.len() - 1);
    }
    protected
}

/// Groups message positions into units that are kept or dropped together.
///
/// An assistant message with structured calls forms one unit with every
/// tool message answering those calls. Tagged results carry no id the
/// assistant text knows about, so they join the latest assistant message.
/// Everything else is its own unit.
fn units(messages: &[ChatMessage]) -> Vec<Vec<usize>> {
    let mut units: Vec<Vec<usize>> = Vec::new();
    let mut owner: HashMap<&str, usize> = HashMap::new();
    let mut last_assistant: Option<usize> = None;

    for (idx, message) in messages.iter().enumerate() {
        if message.is_tool_result() {
            let answered = message
                .tool_call_id
                .as_deref()
                .and_then(|id| owner.get(id))
                .copied();
            let tagged = last_assistant.filter(|_| message.role == Role::User);
            if let Some(unit) = answered.or(tagged) {
                units[unit].push(idx);
                continue;
            }
        }
        for call in &message.tool_calls {
            owner.insert(call.id.as_str(), units.len());
        }
        if message.role == Role::Assistant {
            last_assistant = Some(units.len());
        }
        units.push(vec![idx]);
    }
    units
}

fn has_unresolved_call(messages: &[ChatMessage], unit: &[usize]) -> bool {
    let head = &messages[unit[0]];
    head.tool_calls.iter().any(|call| {
        !unit[1..]
            .iter()
            .any(|&idx| messages[idx].tool_call_id.as_deref() == Some(call.id.as_str()))
    })
}

fn oldest_droppable_unit(messages: &[ChatMessage]) -> Option<Vec<usize>> {
    let protected = protected_positions(messages);
    units(messages).into_iter().find(|unit| {
        !unit.iter().any(|idx| protected.contains(idx) || messages[*idx].pinned)
            && !has_unresolved_call(messages, unit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CallOrigin, MessageContent, NewMessage, ToolCall, ToolInvocationRequest,
        ToolInvocationResult,
    };
    use pretty_assertions::assert_eq;

    /// Counts one token per message so tests can reason about budgets.
    struct PerMessage;

    impl TokenCounter for PerMessage {
        fn count(&self, _model: &str, messages: &[ChatMessage]) -> usize {
            messages.len()
        }
    }

    fn compressor(budget: usize) -> ContextCompressor {
        ContextCompressor::new(Arc::new(PerMessage))
            .with_budgets(BudgetTable::new().with_override("test", ModelBudget::new(budget, 0)))
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "ls".into(),
            arguments: serde_json::json!({}),
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("first question"),
            ChatMessage::assistant_with_calls("", vec![call("c1")]),
            ChatMessage::tool("c1", "ls", "a.txt"),
            ChatMessage::assistant("there is a.txt"),
            ChatMessage::user("second question"),
            ChatMessage::assistant("answer"),
        ]
    }

    fn tagged_result(text: &str) -> ChatMessage {
        let request = ToolInvocationRequest::tagged("echo", "echo", serde_json::json!({"text": text}));
        assert_eq!(request.origin, CallOrigin::Tagged);
        let result = ToolInvocationResult::success(&request, serde_json::json!(text));
        match NewMessage::tool_result(&result).content {
            MessageContent::Chat(chat) => chat,
            other => panic!("expected chat content, got {other:?}"),
        }
    }

    #[test]
    fn tagged_results_do_not_count_as_the_latest_user_message() {
        let system = ChatMessage::system("sys");
        let messages = vec![
            ChatMessage::assistant("old"),
            ChatMessage::user("please echo hi"),
            ChatMessage::assistant("<echo>hi</echo>"),
            tagged_result("hi"),
        ];
        let out = compressor(3).compress(&system, &messages, "test");

        assert_eq!(out.messages, messages[1..].to_vec());
        assert!(out.overflowed);
    }

    #[test]
    fn tagged_calls_are_dropped_together_with_their_results() {
        let system = ChatMessage::system("sys");
        let messages = vec![
            ChatMessage::user("echo a"),
            ChatMessage::assistant("<echo>a</echo>"),
            tagged_result("a"),
            ChatMessage::user("please echo hi"),
            ChatMessage::assistant("<echo>hi</echo>"),
            tagged_result("hi"),
        ];
        // 1 system + 6 messages; the first user message and the first
        // call/result pair have to go.
        let out = compressor(5).compress(&system, &messages, "test");

        assert_eq!(out.messages, messages[3..].to_vec());
        assert!(!out.overflowed);
    }

    #[test]
    fn under_budget_is_returned_unchanged() {
        let system = ChatMessage::system("sys");
        let out = compressor(100).compress(&system, &history(), "test");
        assert_eq!(out.messages, history());
        assert_eq!(out.used_tokens, 7);
        assert!(!out.overflowed);
    }

    #[test]
    fn drops_oldest_units_and_keeps_calls_with_results() {
        let system = ChatMessage::system("sys");
        // 1 system + 6 messages; a budget of 5 forces two removals.
        let out = compressor(5).compress(&system, &history(), "test");

        assert_eq!(
            out.messages,
            vec![
                ChatMessage::assistant("there is a.txt"),
                ChatMessage::user("second question"),
                ChatMessage::assistant("answer"),
            ]
        );
        assert!(!out.overflowed);
        assert!(out
            .messages
            .iter()
            .all(|m| m.role != Role::Tool && m.tool_calls.is_empty()));
    }

    #[test]
    fn unresolved_calls_and_pinned_messages_survive() {
        let system = ChatMessage::system("sys");
        let messages = vec![
            ChatMessage::user("keep me").pinned(),
            ChatMessage::assistant_with_calls("", vec![call("open")]),
            ChatMessage::assistant("chatter"),
            ChatMessage::user("latest"),
        ];
        let out = compressor(1).compress(&system, &messages, "test");

        assert!(out.overflowed);
        assert_eq!(
            out.messages,
            vec![
                ChatMessage::user("keep me").pinned(),
                ChatMessage::assistant_with_calls("", vec![call("open")]),
                ChatMessage::user("latest"),
            ]
        );
    }

    #[test]
    fn compressing_twice_is_a_no_op() {
        let system = ChatMessage::system("sys");
        let big = "x".repeat(500);
        let messages = vec![
            ChatMessage::user(big.clone()),
            ChatMessage::assistant_with_calls("", vec![call("c1")]),
            ChatMessage::tool("c1", "cat", big.clone()),
            ChatMessage::assistant(big.clone()),
            ChatMessage::user(big.clone()),
        ];
        let compressor = ContextCompressor::default()
            .with_max_message_chars(100)
            .with_budgets(BudgetTable::new().with_override("test", ModelBudget::new(200, 0)));

        let once = compressor.compress(&system, &messages, "test");
        let twice = compressor.compress(&system, &once.messages, "test");
        assert_eq!(once, twice);
    }

    #[test]
    fn truncation_stops_at_the_limit_and_spares_the_latest_user_message() {
        let system = ChatMessage::system("s");
        let messages = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant_with_calls("", vec![call("c1")]),
            ChatMessage::tool("c1", "cat", "y".repeat(4_000)),
            ChatMessage::user("z".repeat(400)),
        ];
        let compressor = ContextCompressor::default()
            .with_max_message_chars(200)
            .with_budgets(BudgetTable::new().with_override("test", ModelBudget::new(300, 0)));

        let out = compressor.compress(&system, &messages, "test");
        assert!(!out.overflowed);
        assert_eq!(out.messages.len(), 4);
        assert_eq!(out.messages[2].content.chars().count(), 200);
        assert!(out.messages[2].content.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.messages[3].content.len(), 400);
    }
}
