//! Dynamic tool provider: tools discovered at runtime from an external protocol.

use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::schema::ToolSchema;
use super::tool::{Tool, ToolExecutionContext, ToolOutput};
use crate::error::RuntimeError;

/// Trait for adapters that discover and execute tools at runtime.
#[async_trait]
pub trait DynamicToolProvider: Send + Sync {
    /// Name of the adapter, used in logs.
    fn provider_name(&self) -> &str;

    /// Discover available tools (the initialization round-trip).
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, RuntimeError>;

    /// Execute a discovered tool by name.
    async fn call_tool(
        &self,
        name: &str,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RuntimeError>;
}

/// Exposes one discovered tool through the core [`Tool`] trait.
pub struct DynamicToolAdapter {
    provider: Arc<dyn DynamicToolProvider>,
    schema: ToolSchema,
}

impl DynamicToolAdapter {
    pub fn new(provider: Arc<dyn DynamicToolProvider>, schema: ToolSchema) -> Self {
        Self { provider, schema }
    }
}

#[async_trait]
impl Tool for DynamicToolAdapter {
    fn name(&self) -> &str {
        self.provider.provider_name()
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        vec![self.schema.clone()]
    }

    async fn invoke(
        &self,
        function: &str,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RuntimeError> {
        self.provider.call_tool(function, args, ctx).await
    }
}
