//! Tool execution coordinator.
//!
//! Every invocation ends in a [`ToolInvocationResult`]; nothing a tool does
//! (erroring, panicking, hanging past the timeout) escapes as an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::config::ConcurrencyMode;
use crate::error::RuntimeError;
use crate::observe::{emit, ObservabilitySink, RuntimeEvent, RuntimeEventKind};
use crate::tools::validation::validate_arguments;
use crate::tools::{ToolArguments, ToolExecutionContext, ToolRegistry};
use crate::types::{ThreadId, ToolInvocationRequest, ToolInvocationResult};
use crate::util::timeout::with_timeout;

/// Runs tool invocations against a registry.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    sink: Option<Arc<dyn ObservabilitySink>>,
    timeout: Option<Duration>,
    thread_id: Option<ThreadId>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("functions", &self.registry.len())
            .field("timeout", &self.timeout)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            sink: None,
            timeout: None,
            thread_id: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn ObservabilitySink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Thread the invocations belong to, passed on to tools.
    pub fn for_thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Invoke one request. Failures are returned as `success = false`.
    pub async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult {
        let result = match self.try_invoke(request).await {
            Ok(result) => result,
            Err(err) => ToolInvocationResult::failure(request, err.to_string()),
        };

        if result.success {
            tracing::debug!(
                call_id = %result.call_id,
                tool = %result.tool_name,
                "tool invocation completed"
            );
        } else {
            tracing::warn!(
                call_id = %result.call_id,
                tool = %result.tool_name,
                output = %result.output,
                "tool invocation failed"
            );
            if let Some(thread_id) = self.thread_id {
                emit(
                    &self.sink,
                    RuntimeEvent::new(
                        RuntimeEventKind::ToolError,
                        thread_id,
                        serde_json::json!({
                            "call_id": result.call_id,
                            "tool_name": result.tool_name,
                            "output": result.output,
                        }),
                    ),
                );
            }
        }
        result
    }

    async fn try_invoke(
        &self,
        request: &ToolInvocationRequest,
    ) -> Result<ToolInvocationResult, RuntimeError> {
        let function = self
            .registry
            .lookup_by_structured_name(&request.tool_name)
            .ok_or_else(|| RuntimeError::ToolNotFound(request.tool_name.clone()))?;

        validate_arguments(&request.arguments, &function.schema.structured.parameters)
            .map_err(|e| RuntimeError::InvalidArgument(format!("Argument validation failed: {e}")))?;

        let args = ToolArguments::new(request.arguments.clone());
        let ctx = ToolExecutionContext {
            thread_id: self.thread_id,
            call_id: Some(request.call_id.clone()),
            origin: Some(request.origin),
            metadata: serde_json::Value::Null,
        };

        let invocation = AssertUnwindSafe(function.tool.invoke(&function.schema.name, &args, &ctx))
            .catch_unwind()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(panic) => Err(RuntimeError::tool(
                    &request.tool_name,
                    format!("tool panicked: {}", panic_message(panic.as_ref())),
                )),
            });
        let output = with_timeout(self.timeout, invocation).await?;

        Ok(ToolInvocationResult::from_request(
            request,
            output.success,
            output.output,
        ))
    }

    /// Start a dispatch session for one response's requests.
    pub fn session(&self, mode: ConcurrencyMode) -> ExecutionSession {
        ExecutionSession::new(self.clone(), mode)
    }

    /// Execute a batch. Sequential results come back in request order,
    /// parallel results in completion order.
    pub async fn execute(
        &self,
        requests: Vec<ToolInvocationRequest>,
        mode: ConcurrencyMode,
    ) -> Vec<ToolInvocationResult> {
        let mut session = self.session(mode);
        for request in requests {
            session.dispatch(request);
        }
        session.close();

        let mut results = Vec::with_capacity(session.outstanding());
        while let Some(result) = session.next_result().await {
            results.push(result);
        }
        results
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Requests handed over while a response is still being read.
///
/// Invocations run on spawned tasks, so they finish even if the session is
/// dropped before every result was collected.
pub struct ExecutionSession {
    mode: ConcurrencyMode,
    executor: ToolExecutor,
    /// Feeds the sequential worker; `None` once closed.
    queue: Option<mpsc::UnboundedSender<ToolInvocationRequest>>,
    results_tx: mpsc::UnboundedSender<ToolInvocationResult>,
    results_rx: mpsc::UnboundedReceiver<ToolInvocationResult>,
    outstanding: usize,
}

impl ExecutionSession {
    fn new(executor: ToolExecutor, mode: ConcurrencyMode) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let queue = match mode {
            ConcurrencyMode::Sequential => {
                let (tx, mut rx) = mpsc::unbounded_channel::<ToolInvocationRequest>();
                let worker = executor.clone();
                let results = results_tx.clone();
                tokio::spawn(async move {
                    while let Some(request) = rx.recv().await {
                        let result = worker.invoke(&request).await;
                        if results.send(result).is_err() {
                            tracing::debug!(
                                call_id = %request.call_id,
                                "result receiver dropped; continuing queued invocations"
                            );
                        }
                    }
                });
                Some(tx)
            }
            ConcurrencyMode::Parallel => None,
        };
        Self {
            mode,
            executor,
            queue,
            results_tx,
            results_rx,
            outstanding: 0,
        }
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Hand a request to the coordinator; it starts without waiting.
    pub fn dispatch(&mut self, request: ToolInvocationRequest) {
        tracing::debug!(
            call_id = %request.call_id,
            tool = %request.tool_name,
            mode = %self.mode,
            "dispatching tool invocation"
        );
        match self.mode {
            ConcurrencyMode::Sequential => match &self.queue {
                Some(queue) => {
                    if let Err(mpsc::error::SendError(request)) = queue.send(request) {
                        self.spawn_one(request);
                    }
                }
                None => self.spawn_one(request),
            },
            ConcurrencyMode::Parallel => self.spawn_one(request),
        }
        self.outstanding += 1;
    }

    fn spawn_one(&self, request: ToolInvocationRequest) {
        let executor = self.executor.clone();
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let result = executor.invoke(&request).await;
            let _ = results.send(result);
        });
    }

    /// No more requests will be dispatched.
    pub fn close(&mut self) {
        self.queue = None;
    }

    /// Dispatched requests whose result has not been taken yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Next finished result, or `None` when nothing is outstanding.
    ///
    /// Cancel-safe: a result is only counted once it is returned.
    pub async fn next_result(&mut self) -> Option<ToolInvocationResult> {
        if self.outstanding == 0 {
            return None;
        }
        let result = self.results_rx.recv().await?;
        self.outstanding -= 1;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::{StructuredSchema, ToolSchema};
    use crate::tools::tool::{FnTool, ToolOutput};
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                Arc::new(FnTool::new(
                    ToolSchema::new(
                        "sleep",
                        "Sleep then echo",
                        StructuredSchema::object()
                            .integer("ms", "Milliseconds", true)
                            .build(),
                    ),
                    |args, _ctx| async move {
                        let ms = args.get_i64("ms")?;
                        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                        Ok(ToolOutput::success(ms))
                    },
                )),
                None,
            )
            .unwrap();
        registry
            .register(
                Arc::new(FnTool::new(
                    ToolSchema::new("explode", "Panics", StructuredSchema::empty()),
                    |_args, _ctx| async move {
                        if true {
                            panic!("kaboom");
                        }
                        Ok(ToolOutput::success("unreachable"))
                    },
                )),
                None,
            )
            .unwrap();
        registry
            .register(
                Arc::new(FnTool::new(
                    ToolSchema::new("fail", "Errors", StructuredSchema::empty()),
                    |_args, _ctx| async move { Err(RuntimeError::tool("fail", "disk full")) },
                )),
                None,
            )
            .unwrap();
        registry
    }

    fn sleep(id: &str, ms: u64) -> ToolInvocationRequest {
        ToolInvocationRequest::structured(id, "sleep", serde_json::json!({ "ms": ms }))
    }

    #[tokio::test]
    async fn failures_become_results() {
        let executor = ToolExecutor::new(registry());

        let missing = executor
            .invoke(&ToolInvocationRequest::structured("1", "nope", serde_json::json!({})))
            .await;
        assert!(!missing.success);
        assert_eq!(missing.output, serde_json::json!("Tool 'nope' not found"));

        let invalid = executor
            .invoke(&ToolInvocationRequest::structured("2", "sleep", serde_json::json!({})))
            .await;
        assert!(!invalid.success);
        assert!(invalid.output.as_str().unwrap().contains("ms"));

        let panicked = executor
            .invoke(&ToolInvocationRequest::structured("3", "explode", serde_json::json!({})))
            .await;
        assert!(!panicked.success);
        assert!(panicked.output.as_str().unwrap().contains("kaboom"));

        let errored = executor
            .invoke(&ToolInvocationRequest::structured("4", "fail", serde_json::json!({})))
            .await;
        assert!(!errored.success);
        assert!(errored.output.as_str().unwrap().contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_produces_failed_result() {
        let executor = ToolExecutor::new(registry()).with_timeout(Some(Duration::from_millis(10)));
        let result = executor.invoke(&sleep("slow", 1_000)).await;
        assert!(!result.success);
        assert_eq!(result.output, serde_json::json!("Timeout after 10ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_keeps_request_order() {
        let executor = ToolExecutor::new(registry());
        let results = executor
            .execute(
                vec![sleep("a", 30), sleep("b", 10), sleep("c", 20)],
                ConcurrencyMode::Sequential,
            )
            .await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_returns_in_completion_order() {
        let executor = ToolExecutor::new(registry());
        let results = executor
            .execute(
                vec![sleep("a", 30), sleep("b", 10), sleep("c", 20)],
                ConcurrencyMode::Parallel,
            )
            .await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_siblings() {
        let executor = ToolExecutor::new(registry());
        let results = executor
            .execute(
                vec![
                    ToolInvocationRequest::structured("x", "explode", serde_json::json!({})),
                    sleep("y", 1),
                ],
                ConcurrencyMode::Sequential,
            )
            .await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
    }
}
