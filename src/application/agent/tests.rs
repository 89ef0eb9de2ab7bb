use super::runner::{REASONING_INSTRUCTION, SUMMARY_INSTRUCTION};
use super::*;
use crate::model::{ModelError, ModelProvider, ModelRequest};
use crate::tooling::{CalculatorTool, Tool, ToolError, ToolRegistry};
use crate::types::{Message, Role, ToolCallRequest, ToolSpec};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
struct ScriptedProvider {
    responses: Arc<Mutex<VecDeque<Message>>>,
    recordings: Arc<Mutex<Vec<ModelRequest>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            recordings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing() -> Self {
        Self::new(Vec::new())
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.recordings.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn decide(&self, request: ModelRequest) -> Result<Message, ModelError> {
        self.recordings.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ModelError::InvalidResponse("scripted provider exhausted".into()))
    }
}

#[derive(Debug)]
struct StubRateTool;

#[async_trait]
impl Tool for StubRateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "currency_rate".into(),
            description: "Retrieve the exchange rate between two currencies.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from_currency": {"type": "string"},
                    "to_currency": {"type": "string"}
                },
                "required": ["from_currency", "to_currency"]
            }),
        }
    }

    async fn call(&self, _arguments: &Map<String, Value>) -> Result<String, ToolError> {
        Ok("1 USD = 0.9213 EUR".to_string())
    }
}

#[derive(Debug)]
struct FlakyQuoteTool;

#[async_trait]
impl Tool for FlakyQuoteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "flaky_quote".into(),
            description: "Always fails.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _arguments: &Map<String, Value>) -> Result<String, ToolError> {
        Err(ToolError::execution("flaky_quote", "upstream unavailable"))
    }
}

fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}

fn agent(provider: &ScriptedProvider, registry: Arc<ToolRegistry>) -> Agent<ScriptedProvider> {
    Agent::new(Arc::new(provider.clone()), registry, "gpt-4.1")
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments: arguments.as_object().cloned().unwrap_or_default(),
    }
}

fn tool_messages(request: &ModelRequest) -> Vec<&Message> {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect()
}

#[test]
fn routing_is_decided_solely_by_tool_call_presence() {
    assert_eq!(route(&Message::assistant("done")), Route::Summarize);
    assert_eq!(route(&Message::user("question")), Route::Summarize);
    assert_eq!(
        route(&Message::tool_request("", Vec::new())),
        Route::Summarize
    );
    assert_eq!(
        route(&Message::tool_request(
            "checking",
            vec![call("call-1", "calculator", json!({"expression": "1+1"}))]
        )),
        Route::RunTool
    );
}

#[tokio::test]
async fn returns_final_answer_without_tool_round() {
    let provider = ScriptedProvider::new(vec![
        Message::assistant("no tools needed here"),
        Message::assistant("Plain advisory answer."),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(CalculatorTool::new())]));

    let outcome = agent
        .run("should I worry about inflation?", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert_eq!(outcome.answer, "Plain advisory answer.");
    assert!(outcome.steps.is_empty());

    let records = provider.requests().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].system_instruction, REASONING_INSTRUCTION);
    assert!(!records[0].tools.is_empty());
    assert_eq!(records[1].system_instruction, SUMMARY_INSTRUCTION);
    assert!(records[1].tools.is_empty());
    assert!(
        records[0]
            .messages
            .iter()
            .any(|m| m.content.contains("inflation"))
    );
}

#[tokio::test]
async fn currency_conversion_round_trips_tool_results() {
    let provider = ScriptedProvider::new(vec![
        Message::tool_request(
            "let me check the rate",
            vec![call(
                "call-1",
                "currency_rate",
                json!({"from_currency": "USD", "to_currency": "EUR"}),
            )],
        ),
        Message::assistant("rate gathered"),
        Message::assistant("100 USD is about 92.13 EUR."),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(StubRateTool)]));

    let outcome = agent
        .run("Convert 100 USD to EUR", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert!(outcome.answer.contains("92.13"));
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.steps[0].tool, "currency_rate");
    assert!(outcome.steps[0].success);

    let records = provider.requests().await;
    assert_eq!(records.len(), 3);
    let results = tool_messages(&records[1]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].call_id.as_deref(), Some("call-1"));
    assert!(results[0].content.contains("0.9213"));
}

#[tokio::test]
async fn unknown_tool_failure_feeds_next_reasoning_step() {
    let provider = ScriptedProvider::new(vec![
        Message::tool_request(
            "",
            vec![call("call-1", "get_crypto_price", json!({"symbol": "BTC"}))],
        ),
        Message::assistant("that capability is not available"),
        Message::assistant("I cannot look up crypto prices, but here is what I know."),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(CalculatorTool::new())]));

    let outcome = agent
        .run("What is bitcoin trading at?", AgentOptions::default())
        .await
        .expect("run recovers locally");

    assert_eq!(outcome.steps.len(), 1);
    assert!(!outcome.steps[0].success);
    assert!(outcome.steps[0].output.contains("unknown tool"));

    // The failure is re-presented to the next reasoning call as context.
    let records = provider.requests().await;
    let results = tool_messages(&records[1]);
    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("unknown tool"));
    assert!(results[0].content.contains("get_crypto_price"));
}

#[tokio::test]
async fn math_question_routes_to_calculator() {
    let provider = ScriptedProvider::new(vec![
        Message::tool_request(
            "",
            vec![call(
                "call-1",
                "calculator",
                json!({"expression": "200 * 15 / 100"}),
            )],
        ),
        Message::assistant("computed"),
        Message::assistant("15% of 200 is 30."),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(CalculatorTool::new())]));

    let outcome = agent
        .run("what is 15% of 200", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert_eq!(outcome.steps[0].output, "30");
    assert!(outcome.answer.contains("30"));
}

#[tokio::test]
async fn inference_failure_aborts_run_without_partial_answer() {
    let provider = ScriptedProvider::failing();
    let agent = agent(&provider, registry(vec![Arc::new(CalculatorTool::new())]));

    let error = agent
        .run("anything", AgentOptions::default())
        .await
        .expect_err("inference failure surfaces");
    assert!(matches!(error, AgentError::Inference(_)));

    // Only the reasoning call was attempted; no summarization happened.
    assert_eq!(provider.requests().await.len(), 1);
}

#[tokio::test]
async fn sibling_failure_does_not_abort_round() {
    let provider = ScriptedProvider::new(vec![
        Message::tool_request(
            "",
            vec![
                call("call-1", "flaky_quote", json!({})),
                call(
                    "call-2",
                    "currency_rate",
                    json!({"from_currency": "USD", "to_currency": "EUR"}),
                ),
            ],
        ),
        Message::assistant("one of two worked"),
        Message::assistant("Partial data summary."),
    ]);
    let agent = agent(
        &provider,
        registry(vec![Arc::new(FlakyQuoteTool), Arc::new(StubRateTool)]),
    );

    let outcome = agent
        .run("quote and rate please", AgentOptions::default())
        .await
        .expect("run succeeds");

    assert_eq!(outcome.steps.len(), 2);
    assert_eq!(outcome.steps[0].tool, "flaky_quote");
    assert!(!outcome.steps[0].success);
    assert_eq!(outcome.steps[1].tool, "currency_rate");
    assert!(outcome.steps[1].success);

    // One result message per request, appended in request order.
    let records = provider.requests().await;
    let results = tool_messages(&records[1]);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].call_id.as_deref(), Some("call-1"));
    assert_eq!(results[1].call_id.as_deref(), Some("call-2"));
}

#[tokio::test]
async fn step_budget_forces_summarization() {
    let provider = ScriptedProvider::new(vec![
        Message::tool_request(
            "",
            vec![call(
                "call-1",
                "currency_rate",
                json!({"from_currency": "USD", "to_currency": "EUR"}),
            )],
        ),
        Message::tool_request(
            "",
            vec![call(
                "call-2",
                "currency_rate",
                json!({"from_currency": "USD", "to_currency": "JPY"}),
            )],
        ),
        Message::assistant("Wrap-up answer."),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(StubRateTool)]));

    let outcome = agent
        .run(
            "compare EUR and JPY rates",
            AgentOptions {
                model: None,
                max_steps: 1,
            },
        )
        .await
        .expect("run succeeds");

    assert_eq!(outcome.answer, "Wrap-up answer.");
    assert_eq!(outcome.steps.len(), 2);
    assert!(outcome.steps[0].success);
    assert!(!outcome.steps[1].success);
    assert!(outcome.steps[1].output.contains("tool budget exhausted"));

    let records = provider.requests().await;
    assert_eq!(records.len(), 3);
    let summaries: Vec<_> = records
        .iter()
        .filter(|r| r.system_instruction.starts_with(SUMMARY_INSTRUCTION))
        .collect();
    assert_eq!(summaries.len(), 1);
    assert!(
        summaries[0]
            .system_instruction
            .contains("No further tool calls are available")
    );
}

#[tokio::test]
async fn empty_terminal_message_is_no_final_answer() {
    let provider = ScriptedProvider::new(vec![
        Message::assistant("thinking"),
        Message::assistant("   "),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(CalculatorTool::new())]));

    let error = agent
        .run("anything", AgentOptions::default())
        .await
        .expect_err("empty answer is an error");
    assert!(matches!(error, AgentError::NoFinalAnswer));
}

#[tokio::test]
async fn model_override_reaches_the_provider() {
    let provider = ScriptedProvider::new(vec![
        Message::assistant("ok"),
        Message::assistant("answer"),
    ]);
    let agent = agent(&provider, registry(vec![Arc::new(CalculatorTool::new())]));

    agent
        .run(
            "anything",
            AgentOptions {
                model: Some("gpt-4o-mini".into()),
                max_steps: 8,
            },
        )
        .await
        .expect("run succeeds");

    let records = provider.requests().await;
    assert!(records.iter().all(|r| r.model == "gpt-4o-mini"));
}
