use super::errors::AgentError;
use super::models::{AgentOptions, AgentOutcome, AgentStep};
use crate::model::{ModelProvider, ModelRequest};
use crate::tooling::ToolRegistry;
use crate::types::{Conversation, Message, ToolCallRequest, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) const REASONING_INSTRUCTION: &str = "\
You are a financial advisor agent. You can:
- use the stock_quote tool for stock or company price and information,
- use the currency_rate tool for real-time currency and forex data,
- use the calculator tool for basic math or finance calculations (returns, averages, conversions).
Always explain your steps, choose the right tool, and combine the gathered information before you answer the user.";

pub(crate) const SUMMARY_INSTRUCTION: &str = "\
Summarize the steps and results above as a human-friendly financial advisory answer. \
Give advice or next steps if appropriate, with clear numbers or explanations.";

const EXHAUSTED_NOTE: &str =
    "No further tool calls are available; answer with the information gathered so far.";
const EXHAUSTED_RESULT: &str = "tool budget exhausted; no further tool calls are available";

/// States of the agent step cycle. `Reason` and `RunTool` alternate until the
/// model stops requesting tools or the step budget runs out; `Summarize` is
/// entered at most once and leads unconditionally to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentState {
    Reason,
    RunTool,
    Summarize,
    Done,
}

/// The sole branch point of the cycle, decided purely on the latest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    RunTool,
    Summarize,
}

pub fn route(latest: &Message) -> Route {
    if latest.has_tool_calls() {
        Route::RunTool
    } else {
        Route::Summarize
    }
}

/// Orchestrates one user query from submission to final answer. Each run
/// owns a fresh conversation; nothing is shared across queries.
pub struct Agent<P: ModelProvider> {
    provider: Arc<P>,
    registry: Arc<ToolRegistry>,
    default_model: String,
}

impl<P: ModelProvider> Agent<P> {
    pub fn new(
        provider: Arc<P>,
        registry: Arc<ToolRegistry>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            default_model: default_model.into(),
        }
    }

    pub async fn run(
        &self,
        question: impl Into<String>,
        options: AgentOptions,
    ) -> Result<AgentOutcome, AgentError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let mut conversation = Conversation::new(question);
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut remaining_rounds = options.max_steps;
        let mut exhausted = false;
        let mut state = AgentState::Reason;
        info!(run_id = conversation.id(), model = %model, "Agent run started");

        loop {
            state = match state {
                AgentState::Reason => {
                    debug!(remaining_rounds, "Submitting reasoning turn to model");
                    let reply = self
                        .provider
                        .decide(ModelRequest {
                            model: model.clone(),
                            system_instruction: REASONING_INSTRUCTION.to_string(),
                            messages: conversation.messages().to_vec(),
                            tools: self.registry.specs(),
                        })
                        .await?;
                    conversation.push(reply);

                    match route(conversation.last()) {
                        Route::Summarize => AgentState::Summarize,
                        Route::RunTool if remaining_rounds == 0 => {
                            warn!("Tool round budget exhausted; forcing summarization");
                            exhausted = true;
                            let pending = conversation.last().tool_calls.clone();
                            for request in &pending {
                                let result = ToolResult::fail(&request.id, EXHAUSTED_RESULT);
                                steps.push(step_from(request, &result));
                                conversation.push(Message::tool_result(&result));
                            }
                            AgentState::Summarize
                        }
                        Route::RunTool => {
                            remaining_rounds -= 1;
                            AgentState::RunTool
                        }
                    }
                }
                AgentState::RunTool => {
                    // Sequential execution: one result message per request,
                    // appended in request order, failures included.
                    let pending = conversation.last().tool_calls.clone();
                    for request in &pending {
                        info!(tool = %request.name, call_id = %request.id, "Executing requested tool");
                        let result = self.registry.invoke(request).await;
                        steps.push(step_from(request, &result));
                        conversation.push(Message::tool_result(&result));
                    }
                    AgentState::Reason
                }
                AgentState::Summarize => {
                    let instruction = if exhausted {
                        format!("{SUMMARY_INSTRUCTION}\n\n{EXHAUSTED_NOTE}")
                    } else {
                        SUMMARY_INSTRUCTION.to_string()
                    };
                    debug!("Submitting summarization turn to model");
                    let summary = self
                        .provider
                        .decide(ModelRequest {
                            model: model.clone(),
                            system_instruction: instruction,
                            messages: conversation.messages().to_vec(),
                            tools: Vec::new(),
                        })
                        .await?;
                    conversation.push(summary);
                    AgentState::Done
                }
                AgentState::Done => {
                    let answer = conversation.last().content.trim().to_string();
                    if answer.is_empty() {
                        warn!(run_id = conversation.id(), "Terminal message has no content");
                        return Err(AgentError::NoFinalAnswer);
                    }
                    info!(
                        run_id = conversation.id(),
                        tool_steps = steps.len(),
                        "Agent run finished"
                    );
                    return Ok(AgentOutcome {
                        run_id: conversation.id().to_string(),
                        answer,
                        steps,
                    });
                }
            };
        }
    }
}

fn step_from(request: &ToolCallRequest, result: &ToolResult) -> AgentStep {
    AgentStep {
        tool: request.name.clone(),
        arguments: Value::Object(request.arguments.clone()),
        success: result.success,
        output: result.payload.clone(),
    }
}
