//! Per-run configuration of the runtime loop.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::RuntimeError;

/// How a batch of tool calls is executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConcurrencyMode {
    /// One at a time, in request order.
    #[default]
    Sequential,
    /// All at once; results arrive in completion order.
    Parallel,
}

/// What happens to tool calls that follow a turn-ending tool in the same response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TerminationPolicy {
    /// Later calls are not surfaced or executed.
    #[default]
    IgnoreRemainingCalls,
    /// Later calls still run; the turn ends afterwards.
    ExecuteRemainingCalls,
}

/// Behaviour switches for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfiguration {
    pub use_tagged_syntax: bool,
    pub use_structured_calls: bool,
    pub execute_tools: bool,
    pub execute_on_stream: bool,
    pub concurrency: ConcurrencyMode,
    /// Zero disables the limit.
    pub max_tagged_calls_per_turn: usize,
    /// Zero disables auto-continue.
    pub max_auto_continues: usize,
    pub termination_policy: TerminationPolicy,
    pub tool_timeout_ms: Option<u64>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            use_tagged_syntax: true,
            use_structured_calls: false,
            execute_tools: true,
            execute_on_stream: true,
            concurrency: ConcurrencyMode::Sequential,
            max_tagged_calls_per_turn: 0,
            max_auto_continues: 25,
            termination_policy: TerminationPolicy::IgnoreRemainingCalls,
            tool_timeout_ms: None,
        }
    }
}

impl RunConfiguration {
    /// Reject contradictory settings before any provider call.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.execute_tools && !self.use_tagged_syntax && !self.use_structured_calls {
            return Err(RuntimeError::Configuration(
                "execute_tools is set but neither tagged syntax nor structured calls are enabled"
                    .to_string(),
            ));
        }
        if self.execute_on_stream && !self.execute_tools {
            return Err(RuntimeError::Configuration(
                "execute_on_stream requires execute_tools".to_string(),
            ));
        }
        if self.tool_timeout_ms == Some(0) {
            return Err(RuntimeError::Configuration(
                "tool_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auto_continue_enabled(&self) -> bool {
        self.max_auto_continues > 0
    }

    /// Whether `count` tagged calls exhaust the per-turn limit.
    pub fn tagged_limit_reached(&self, count: usize) -> bool {
        self.max_tagged_calls_per_turn > 0 && count >= self.max_tagged_calls_per_turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert!(RunConfiguration::default().validate().is_ok());
    }

    #[test]
    fn executing_without_any_syntax_is_rejected() {
        let config = RunConfiguration {
            use_tagged_syntax: false,
            use_structured_calls: false,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::Configuration(msg)) if msg.contains("neither tagged syntax")
        ));
    }

    #[test]
    fn execute_on_stream_needs_execute_tools() {
        let config = RunConfiguration {
            execute_tools: false,
            execute_on_stream: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RunConfiguration {
            execute_tools: false,
            execute_on_stream: false,
            use_tagged_syntax: false,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tagged_limit_of_zero_never_triggers() {
        let config = RunConfiguration::default();
        assert!(!config.tagged_limit_reached(1_000));
        let limited = RunConfiguration {
            max_tagged_calls_per_turn: 2,
            ..Default::default()
        };
        assert!(!limited.tagged_limit_reached(1));
        assert!(limited.tagged_limit_reached(2));
    }

    #[test]
    fn concurrency_mode_parses_snake_case() {
        assert_eq!("parallel".parse::<ConcurrencyMode>().ok(), Some(ConcurrencyMode::Parallel));
        assert_eq!(TerminationPolicy::ExecuteRemainingCalls.to_string(), "execute_remaining_calls");
    }
}
