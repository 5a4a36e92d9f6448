//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::arguments::ToolArguments;
use super::schema::ToolSchema;
use crate::error::RuntimeError;
use crate::types::{CallOrigin, ThreadId};

/// Context available during tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub thread_id: Option<ThreadId>,
    pub call_id: Option<String>,
    pub origin: Option<CallOrigin>,
    /// Additional metadata for the tool.
    pub metadata: serde_json::Value,
}

/// Value a tool hands back. A tool may report failure without erroring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub output: serde_json::Value,
}

impl ToolOutput {
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Core tool trait. One tool may expose several functions.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Toolkit name, used in logs.
    fn name(&self) -> &str;

    /// Every function this tool exposes.
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Invoke one of the tool's functions.
    async fn invoke(
        &self,
        function: &str,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<ToolOutput, RuntimeError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, RuntimeError>> + Send>>
    + Send
    + Sync;

/// Closure-based single-function tool for quick tool creation.
pub struct FnTool {
    schema: ToolSchema,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    /// Create a tool from a schema and a closure.
    pub fn new<F, Fut>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, RuntimeError>> + Send + 'static,
    {
        Self {
            schema,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.schema.name
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
        if function != self.schema.name {
            return Err(RuntimeError::ToolNotFound(function.to_string()));
        }
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.schema.name)
            .field("tag", &self.schema.tagged.as_ref().map(|t| &t.tag_name))
            .finish()
    }
}
