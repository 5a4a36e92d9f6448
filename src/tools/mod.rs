//! Tool system: tool trait, schemas, registry and argument handling.

pub mod arguments;
pub mod dynamic;
pub mod registry;
pub mod schema;
pub mod tool;
pub mod validation;

pub use arguments::ToolArguments;
pub use dynamic::{DynamicToolAdapter, DynamicToolProvider};
pub use registry::{RegisteredFunction, ToolRegistry};
pub use schema::{MappingKind, ParamMapping, StructuredSchema, TaggedSchema, ToolSchema};
pub use tool::{FnTool, Tool, ToolExecutionContext, ToolOutput};

/// Functions that end the turn when invoked.
pub const TERMINATING_TOOLS: [&str; 3] = ["ask", "complete", "hand_off_to_human"];

/// Whether `name` (structured name or tag) is a turn-ending tool.
///
/// Dashes and underscores are interchangeable, so `hand-off-to-human` matches.
pub fn is_terminating_tool(name: &str) -> bool {
    let normalized = name.replace('-', "_");
    TERMINATING_TOOLS.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminating_tools_match_either_spelling() {
        assert!(is_terminating_tool("complete"));
        assert!(is_terminating_tool("hand-off-to-human"));
        assert!(is_terminating_tool("hand_off_to_human"));
        assert!(!is_terminating_tool("create_file"));
        assert!(!is_terminating_tool("completed"));
    }
}
