mod application;
mod config;
mod domain;
mod infrastructure;

pub use application::{agent, tooling};
pub use domain::types;
pub use infrastructure::model;

use agent::{Agent, AgentOptions};
use clap::Parser;
use config::{AppConfig, Credentials};
use model::OpenAiClient;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tooling::{CalculatorTool, CurrencyRateTool, StockQuoteTool, ToolRegistry};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "finagent",
    version,
    about = "Tool-augmented financial advisor agent"
)]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_steps: Option<usize>,
    #[arg(long)]
    prompt_file: Option<String>,
    question: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    if dotenvy::dotenv().is_ok() {
        debug!("Loaded environment overrides from .env");
    }
    let cli = Cli::parse();
    debug!(config = ?cli.config, model = ?cli.model, "CLI arguments parsed");

    let config_path = cli.config.as_deref().map(Path::new);
    let config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let question = match load_question(&cli) {
        Ok(question) => question,
        Err(notice) => {
            eprintln!("{notice}");
            return ExitCode::FAILURE;
        }
    };

    let provider = match OpenAiClient::new(
        config.openai_base_url.clone(),
        config.credentials.openai_api_key.clone(),
    ) {
        Ok(provider) => Arc::new(provider),
        Err(err) => {
            eprintln!("{}", err.user_message());
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(build_registry(&config.credentials));
    let agent = Agent::new(provider, registry, config.model.clone());
    let options = AgentOptions {
        model: cli.model.clone(),
        max_steps: cli.max_steps.unwrap_or(config.max_steps),
    };

    info!("Dispatching question to agent");
    match agent.run(question, options).await {
        Ok(outcome) => {
            let output = json!({
                "run_id": outcome.run_id,
                "answer": outcome.answer,
                "tool_steps": outcome.steps,
            });
            match serde_json::to_string_pretty(&output) {
                Ok(rendered) => println!("{rendered}"),
                Err(_) => println!("{}", outcome.answer),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            warn!(%err, "Agent run failed");
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

/// Registers every tool whose credentials are available; the calculator has
/// no external dependency and is always present.
fn build_registry(credentials: &Credentials) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool::new()));

    match credentials.serpapi_api_key.clone() {
        Some(key) => registry.register(Arc::new(StockQuoteTool::new(key))),
        None => warn!("SERPAPI_API_KEY not set; stock_quote tool disabled"),
    }
    match credentials.alpha_vantage_api_key.clone() {
        Some(key) => registry.register(Arc::new(CurrencyRateTool::new(key))),
        None => warn!("ALPHA_VANTAGE_API_KEY not set; currency_rate tool disabled"),
    }

    registry
}

fn load_question(cli: &Cli) -> Result<String, String> {
    if let Some(path) = &cli.prompt_file {
        info!(path = %path, "Loading question from file");
        let content = fs::read_to_string(path)
            .map_err(|err| format!("failed to read question from {path}: {err}"))?;
        return normalize_question(content);
    }

    if !cli.question.is_empty() {
        return normalize_question(cli.question.join(" "));
    }

    Err("a question is required, either as arguments or via --prompt-file".to_string())
}

fn normalize_question(question: String) -> Result<String, String> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err("the question must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}
