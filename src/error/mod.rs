//! Error types for threadloop.

use thiserror::Error;

/// Primary error type for all runtime operations.
///
/// Tool failures are normally captured as data (see
/// [`ToolInvocationResult`](crate::types::ToolInvocationResult)); the
/// `ToolExecution` variant only crosses a component boundary when a tool
/// implementation reports failure to the coordinator.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Context overflow: {used_tokens} tokens exceed budget of {budget}")]
    ContextOverflow { used_tokens: usize, budget: usize },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    ToolExecution,
    ContextOverflow,
    Configuration,
    Persistence,
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Serialization,
    Unknown,
}

impl RuntimeError {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an API error from an HTTP status.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Provider { .. } | Self::Stream(_) => ErrorCategory::Provider,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                _ => ErrorCategory::Provider,
            },
            Self::Network(_) => ErrorCategory::Network,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ToolExecution { .. } | Self::ToolNotFound(_) | Self::InvalidArgument(_) => {
                ErrorCategory::ToolExecution
            }
            Self::ContextOverflow { .. } => ErrorCategory::ContextOverflow,
            Self::Persistence(_) => ErrorCategory::Persistence,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a caller could reasonably retry this error.
    ///
    /// The runtime itself never retries; this is a hint for the
    /// orchestration layer that owns retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => matches!(status, 429 | 500..=599),
            _ => matches!(
                self.category(),
                ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Timeout
            ),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_maps_to_category() {
        assert_eq!(
            RuntimeError::api(401, "nope").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            RuntimeError::api(429, "slow down").category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            RuntimeError::api(502, "bad gateway").category(),
            ErrorCategory::Provider
        );
    }

    #[test]
    fn server_errors_are_retryable_but_tool_errors_are_not() {
        assert!(RuntimeError::api(503, "unavailable").is_retryable());
        assert!(RuntimeError::Timeout(10).is_retryable());
        assert!(!RuntimeError::tool("shell", "exit 1").is_retryable());
        assert!(!RuntimeError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn context_overflow_message_names_both_sides() {
        let err = RuntimeError::ContextOverflow {
            used_tokens: 130_000,
            budget: 100_000,
        };
        assert_eq!(
            err.to_string(),
            "Context overflow: 130000 tokens exceed budget of 100000"
        );
    }
}
