mod calculator;
mod finance;

pub use calculator::CalculatorTool;
pub use finance::{CurrencyRateTool, StockQuoteTool};

use crate::types::{ToolCallRequest, ToolResult, ToolSpec};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("tool '{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },
}

impl ToolError {
    pub(crate) fn execution(tool: impl Into<String>, reason: impl ToString) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }
}

/// A named, schema-typed capability the model may request. Implementations
/// may perform external I/O but must stay independent of conversation state
/// and return within a bounded time.
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, arguments: &Map<String, Value>) -> Result<String, ToolError>;
}

/// Closed set of tools registered at startup, dispatched by name. Every
/// fault of a single invocation is folded into a failure `ToolResult` so the
/// next reasoning step can self-correct; only the registry itself is
/// infallible.
#[derive(Default)]
pub struct ToolRegistry {
    index: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name;
        debug!(tool = %name, "Registering tool");
        self.index.insert(name, tool);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.index
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Descriptors for every registered tool, sorted by name so prompts and
    /// wire payloads stay stable across runs.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.index.values().map(|tool| tool.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Resolve, validate, and execute one requested call. Never fails
    /// outright: unknown tools, schema mismatches, and execution faults all
    /// come back as failure results referencing the request identifier.
    pub async fn invoke(&self, request: &ToolCallRequest) -> ToolResult {
        let tool = match self.resolve(&request.name) {
            Ok(tool) => tool,
            Err(err) => {
                warn!(requested_tool = %request.name, "Unknown tool requested by agent");
                return ToolResult::fail(&request.id, err.to_string());
            }
        };

        let spec = tool.spec();
        if let Err(err) = validate_arguments(&spec, &request.arguments) {
            warn!(tool = %request.name, %err, "Tool arguments rejected by schema");
            return ToolResult::fail(&request.id, err.to_string());
        }

        match tool.call(&request.arguments).await {
            Ok(payload) => {
                info!(tool = %request.name, success = true, "Tool executed");
                ToolResult::ok(&request.id, payload)
            }
            Err(err) => {
                warn!(tool = %request.name, %err, "Tool execution failed");
                ToolResult::fail(&request.id, err.to_string())
            }
        }
    }
}

/// Checks the argument map against the tool's declared schema: required keys
/// must be present and declared primitive types must match.
fn validate_arguments(spec: &ToolSpec, arguments: &Map<String, Value>) -> Result<(), ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: spec.name.clone(),
        reason,
    };

    if let Some(required) = spec.parameters.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(key) {
                return Err(invalid(format!("missing required argument '{key}'")));
            }
        }
    }

    let Some(properties) = spec.parameters.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in arguments {
        let Some(declared) = properties.get(key) else {
            return Err(invalid(format!("unexpected argument '{key}'")));
        };
        let Some(kind) = declared.get("type").and_then(Value::as_str) else {
            continue;
        };
        let matches = match kind {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !matches {
            return Err(invalid(format!("argument '{key}' must be of type {kind}")));
        }
    }

    Ok(())
}
