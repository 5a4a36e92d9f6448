//! Assembly of streamed structured tool calls.

use std::collections::BTreeMap;

use crate::types::ToolCall;

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    surfaced: bool,
}

impl PartialCall {
    /// Arguments, once they form a complete JSON object.
    fn complete_arguments(&self) -> Option<serde_json::Value> {
        let parsed: serde_json::Value = serde_json::from_str(&self.arguments).ok()?;
        parsed.is_object().then_some(parsed)
    }
}

/// Collects call fragments by index and reports each call once.
#[derive(Debug, Default)]
pub struct StructuredCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl StructuredCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment. Returns the call if this fragment completed it.
    pub fn push_delta(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: &str,
    ) -> Option<ToolCall> {
        let call = self.calls.entry(index).or_default();
        if call.surfaced {
            tracing::debug!(index, "fragment for an already surfaced call ignored");
            return None;
        }
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id.get_or_insert(id);
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            call.name.get_or_insert(name);
        }
        call.arguments.push_str(arguments);

        let (Some(id), Some(name)) = (&call.id, &call.name) else {
            return None;
        };
        let arguments = call.complete_arguments()?;
        let complete = ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments,
        };
        call.surfaced = true;
        Some(complete)
    }

    /// Calls not surfaced yet, in index order; the stream has ended.
    ///
    /// Missing arguments become `{}`; arguments that are not a JSON object
    /// are kept as a string so validation rejects them visibly.
    pub fn finish(&mut self) -> Vec<ToolCall> {
        let mut flushed = Vec::new();
        for (index, call) in std::mem::take(&mut self.calls) {
            if call.surfaced {
                continue;
            }
            let Some(name) = call.name.clone() else {
                tracing::warn!(index, "dropping structured call without a name");
                continue;
            };
            let arguments = if call.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                call.complete_arguments()
                    .unwrap_or_else(|| serde_json::Value::String(call.arguments.clone()))
            };
            let id = call
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            flushed.push(ToolCall { id, name, arguments });
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn call_surfaces_when_arguments_close() {
        let mut acc = StructuredCallAccumulator::new();
        assert!(acc
            .push_delta(0, Some("c1".into()), Some("ls".into()), "{\"pa")
            .is_none());
        let call = acc.push_delta(0, None, None, "th\": \".\"}").unwrap();
        assert_eq!(call.id, "c1");
        assert_eq!(call.arguments, serde_json::json!({"path": "."}));
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn interleaved_indexes_are_kept_apart() {
        let mut acc = StructuredCallAccumulator::new();
        acc.push_delta(0, Some("a".into()), Some("read".into()), "{\"x\":");
        let b = acc.push_delta(1, Some("b".into()), Some("write".into()), "{}");
        assert_eq!(b.unwrap().name, "write");
        let a = acc.push_delta(0, None, None, "1}").unwrap();
        assert_eq!(a.arguments, serde_json::json!({"x": 1}));
    }

    #[test]
    fn finish_flushes_incomplete_calls() {
        let mut acc = StructuredCallAccumulator::new();
        acc.push_delta(0, Some("a".into()), Some("noargs".into()), "");
        acc.push_delta(1, Some("b".into()), Some("broken".into()), "{\"x\": ");
        acc.push_delta(2, None, None, "{}");

        let flushed = acc.finish();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].arguments, serde_json::json!({}));
        assert_eq!(flushed[1].arguments, serde_json::json!("{\"x\": "));
    }
}
