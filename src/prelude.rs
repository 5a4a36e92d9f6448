//! Convenience re-exports for common use.

pub use crate::config::{ConcurrencyMode, RunConfiguration, RuntimeSettings, TerminationPolicy};
pub use crate::context::ContextCompressor;
pub use crate::error::{Result, RuntimeError};
pub use crate::observe::{ObservabilitySink, RuntimeEvent, RuntimeEventKind, TracingSink};
pub use crate::provider::{ModelProvider, ProviderOutput, ProviderRequest};
pub use crate::thread::{InMemoryThreadStore, ThreadRuntime, ThreadStore, TurnRequest};
pub use crate::tools::{Tool, ToolArguments, ToolRegistry, ToolSchema};
pub use crate::types::{
    ChatMessage, FinishReason, GenerationSettings, NewMessage, Role, StatusKind, StreamChunk,
    ToolInvocationRequest, ToolInvocationResult, Usage,
};
