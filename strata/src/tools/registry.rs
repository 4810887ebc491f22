//! Central tool registry: declaration, lookup, schema emission, and the
//! uniform execution surface with per-tool rate limits and timeouts.
//!
//! Writes happen at startup, reads thereafter; the table sits behind a
//! reader/writer lock. Rate limiting is global per tool (one last-execution
//! timestamp), modelling a shared upstream quota.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use super::spec::{ToolKind, ToolResult, ToolSpec};

/// Failure raised by a tool handler. The registry folds it into
/// [`ToolResult::error`].
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    ExecutionFailed(String),
}

/// Per-call context (caller identity, auth data).
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: Option<String>,
    pub data: BTreeMap<String, Value>,
}

/// The invocable side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: Option<&ToolContext>) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler {
    f: Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Arc<dyn ToolHandler>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Arc::new(Self { f: Box::new(move |params| Box::pin(f(params))) })
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, params: Value, _ctx: Option<&ToolContext>) -> Result<Value, ToolError> {
        (self.f)(params).await
    }
}

#[derive(Clone)]
struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
struct ExecutionStats {
    last_execution: HashMap<String, Instant>,
    counts: HashMap<String, u64>,
}

/// Registry-wide statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub tools_by_category: BTreeMap<String, usize>,
    pub execution_counts: BTreeMap<String, u64>,
    /// Most-executed tools, highest first (top 10).
    pub most_used: Vec<(String, u64)>,
}

/// Declarative tool store with a uniform execution surface.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    stats: Mutex<ExecutionStats>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: RwLock::new(HashMap::new()), stats: Mutex::new(ExecutionStats::default()) }
    }

    /// Registers (or replaces) a tool.
    pub fn register(&self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        info!(tool = %spec.name, category = %spec.category, "registered tool");
        let name = spec.name.clone();
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, RegisteredTool { spec, handler });
    }

    pub fn unregister(&self, name: &str) {
        if self.tools.write().unwrap_or_else(|e| e.into_inner()).remove(name).is_some() {
            info!(tool = %name, "unregistered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|tool| tool.spec.clone())
    }

    /// Declared tools, optionally filtered by category and kind.
    pub fn list(&self, category: Option<&str>, kind: Option<ToolKind>) -> Vec<ToolSpec> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut specs: Vec<ToolSpec> = tools
            .values()
            .map(|tool| tool.spec.clone())
            .filter(|spec| category.map_or(true, |c| spec.category == c))
            .filter(|spec| kind.map_or(true, |k| spec.kind == k))
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Function-calling schema for one tool.
    pub fn schema(&self, name: &str) -> Option<Value> {
        self.get(name).map(|spec| spec.schema())
    }

    pub fn all_schemas(&self) -> Vec<Value> {
        self.list(None, None).iter().map(ToolSpec::schema).collect()
    }

    /// Executes a tool: lookup, rate limit, required-parameter validation,
    /// then the handler under the tool's wall-clock timeout. All failures
    /// come back as `ToolResult { success: false, .. }`.
    pub async fn execute(&self, name: &str, params: Value, ctx: Option<&ToolContext>) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
        else {
            return ToolResult::failure(format!("tool not found: {}", name), started.elapsed());
        };

        // Global per-tool rate limit. Calls exactly 60/rate apart pass.
        if let Some(rate) = tool.spec.rate_limit {
            let min_interval = Duration::from_secs_f64(60.0 / rate as f64);
            let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(last) = stats.last_execution.get(name) {
                if last.elapsed() < min_interval {
                    return ToolResult::failure(
                        format!("rate limit exceeded for {}", name),
                        started.elapsed(),
                    );
                }
            }
        }

        // All required parameters must be present.
        let param_obj = params.as_object();
        for parameter in &tool.spec.parameters {
            if parameter.required
                && !param_obj.is_some_and(|object| object.contains_key(&parameter.name))
            {
                return ToolResult::failure(
                    format!("missing required parameter: {}", parameter.name),
                    started.elapsed(),
                );
            }
        }

        let outcome = tokio::time::timeout(tool.spec.timeout, tool.handler.call(params, ctx)).await;
        let execution_time = started.elapsed();
        match outcome {
            Err(_) => {
                error!(tool = %name, timeout = ?tool.spec.timeout, "tool execution timeout");
                ToolResult::failure(
                    format!("tool execution timeout ({}s)", tool.spec.timeout.as_secs_f64()),
                    execution_time,
                )
            }
            Ok(Err(e)) => {
                error!(tool = %name, error = %e, "tool execution failed");
                ToolResult::failure(e.to_string(), execution_time)
            }
            Ok(Ok(output)) => {
                let count = {
                    let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                    stats.last_execution.insert(name.to_string(), Instant::now());
                    let count = stats.counts.entry(name.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                let mut metadata = BTreeMap::new();
                metadata.insert("execution_count".to_string(), json!(count));
                ToolResult {
                    success: true,
                    output: Some(output),
                    error: None,
                    execution_time,
                    metadata,
                }
            }
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut tools_by_category: BTreeMap<String, usize> = BTreeMap::new();
        for tool in tools.values() {
            *tools_by_category.entry(tool.spec.category.clone()).or_insert(0) += 1;
        }
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let execution_counts: BTreeMap<String, u64> =
            stats.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let mut most_used: Vec<(String, u64)> =
            execution_counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        most_used.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        most_used.truncate(10);
        RegistryStats {
            total_tools: tools.len(),
            tools_by_category,
            execution_counts,
            most_used,
        }
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<ToolRegistry>> = Lazy::new(|| Arc::new(ToolRegistry::new()));

/// Process-wide default registry, initialized lazily. Tests should build
/// their own [`ToolRegistry`] to avoid cross-test leakage.
pub fn default_registry() -> Arc<ToolRegistry> {
    DEFAULT_REGISTRY.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::spec::{ParamType, ToolParameter};

    fn echo_tool(registry: &ToolRegistry, name: &str) {
        registry.register(
            ToolSpec::new(name, "echo")
                .parameter(ToolParameter::required("value", ParamType::String, "Value to echo")),
            FnHandler::new(|params| async move { Ok(params["value"].clone()) }),
        );
    }

    #[tokio::test]
    async fn execute_returns_handler_output() {
        let registry = ToolRegistry::new();
        echo_tool(&registry, "echo");
        let result = registry.execute("echo", json!({"value": "hi"}), None).await;
        assert!(result.success);
        assert_eq!(result.output, Some(json!("hi")));
        assert_eq!(result.metadata["execution_count"], json!(1));
    }

    #[tokio::test]
    async fn missing_tool_and_missing_parameter() {
        let registry = ToolRegistry::new();
        echo_tool(&registry, "echo");

        let missing = registry.execute("nope", json!({}), None).await;
        assert!(!missing.success);
        assert!(missing.error.as_deref().unwrap().contains("tool not found"));

        let invalid = registry.execute("echo", json!({}), None).await;
        assert!(!invalid.success);
        assert_eq!(invalid.error.as_deref(), Some("missing required parameter: value"));
    }

    #[tokio::test]
    async fn handler_error_becomes_result_error() {
        let registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("fail", "always fails"),
            FnHandler::new(|_| async { Err(ToolError::ExecutionFailed("kaboom".into())) }),
        );
        let result = registry.execute("fail", json!({}), None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn timeout_produces_failure_at_deadline() {
        let registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("slow", "sleeps").timeout(Duration::from_millis(50)),
            FnHandler::new(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!(null))
            }),
        );
        let result = registry.execute("slow", json!({}), None).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timeout"));
        assert!(result.execution_time >= Duration::from_millis(50));
        assert!(result.execution_time < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn rate_limit_rejects_rapid_second_call() {
        let registry = ToolRegistry::new();
        registry.register(
            // 60 calls/min = 1s min interval.
            ToolSpec::new("limited", "rate limited").rate_limit(60),
            FnHandler::new(|_| async { Ok(json!("ok")) }),
        );
        assert!(registry.execute("limited", json!({}), None).await.success);
        let second = registry.execute("limited", json!({}), None).await;
        assert!(!second.success);
        assert!(second.error.as_deref().unwrap().contains("rate limit exceeded"));
    }

    #[tokio::test]
    async fn rate_limit_allows_call_after_interval() {
        let registry = ToolRegistry::new();
        registry.register(
            // 600 calls/min = 100ms min interval.
            ToolSpec::new("limited", "rate limited").rate_limit(600),
            FnHandler::new(|_| async { Ok(json!("ok")) }),
        );
        assert!(registry.execute("limited", json!({}), None).await.success);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(registry.execute("limited", json!({}), None).await.success);
    }

    #[tokio::test]
    async fn failed_calls_do_not_advance_rate_window() {
        let registry = ToolRegistry::new();
        registry.register(
            ToolSpec::new("flaky", "fails")
                .rate_limit(60)
                .parameter(ToolParameter::required("x", ParamType::String, "x")),
            FnHandler::new(|_| async { Ok(json!("ok")) }),
        );
        // Validation failure: no timestamp recorded, next call passes.
        assert!(!registry.execute("flaky", json!({}), None).await.success);
        assert!(registry.execute("flaky", json!({"x": "1"}), None).await.success);
    }

    #[tokio::test]
    async fn stats_track_categories_and_counts() {
        let registry = ToolRegistry::new();
        echo_tool(&registry, "echo");
        registry.register(ToolSpec::new("noop", "n").category("misc"), FnHandler::new(|_| async { Ok(json!(null)) }));
        registry.execute("noop", json!({}), None).await;
        registry.execute("noop", json!({}), None).await;

        let stats = registry.stats();
        assert_eq!(stats.total_tools, 2);
        assert_eq!(stats.tools_by_category["general"], 1);
        assert_eq!(stats.tools_by_category["misc"], 1);
        assert_eq!(stats.execution_counts["noop"], 2);
        assert_eq!(stats.most_used[0], ("noop".to_string(), 2));
    }
}
