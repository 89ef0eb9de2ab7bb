use serde::Serialize;
use serde_json::Value;

const DEFAULT_MAX_STEPS: usize = 8;

/// One tool invocation recorded during a run, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub tool: String,
    pub arguments: Value,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub run_id: String,
    pub answer: String,
    pub steps: Vec<AgentStep>,
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Overrides the default model configured on the agent.
    pub model: Option<String>,
    /// Maximum number of tool rounds before the run is forced to summarize.
    pub max_steps: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}
