use super::{Tool, ToolError};
use crate::types::ToolSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const SERPAPI_BASE_URL: &str = "https://serpapi.com";
const ALPHA_VANTAGE_BASE_URL: &str = "https://www.alphavantage.co";

const STOCK_TOOL_NAME: &str = "stock_quote";
const CURRENCY_TOOL_NAME: &str = "currency_rate";

fn http_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

fn required_str<'a>(
    tool: &str,
    arguments: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing required argument '{key}'"),
        })
}

/// Stock and company lookup backed by the SerpApi Google Finance engine.
#[derive(Debug)]
pub struct StockQuoteTool {
    http: Client,
    base_url: String,
    api_key: String,
}

impl StockQuoteTool {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(SERPAPI_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Tool for StockQuoteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: STOCK_TOOL_NAME.into(),
            description: "Look up the current price and basic information of a stock or company \
                          via Google Finance."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Ticker or company name, e.g. \"TSLA\" or \"Apple\""
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        let query = required_str(STOCK_TOOL_NAME, arguments, "query")?;
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        debug!(tool = STOCK_TOOL_NAME, query, "Querying Google Finance");

        let response: FinanceSearchResponse = self
            .http
            .get(url)
            .query(&[
                ("engine", "google_finance"),
                ("q", query),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ToolError::execution(STOCK_TOOL_NAME, err))?
            .error_for_status()
            .map_err(|err| ToolError::execution(STOCK_TOOL_NAME, err))?
            .json()
            .await
            .map_err(|err| ToolError::execution(STOCK_TOOL_NAME, err))?;

        let summary = response.summary.ok_or_else(|| {
            ToolError::execution(
                STOCK_TOOL_NAME,
                format!("no finance summary found for '{query}'"),
            )
        })?;
        Ok(summarize_quote(&summary))
    }
}

fn summarize_quote(summary: &QuoteSummary) -> String {
    let mut parts = Vec::new();
    match (&summary.title, &summary.stock) {
        (Some(title), Some(stock)) => parts.push(format!("{title} ({stock})")),
        (Some(title), None) => parts.push(title.clone()),
        (None, Some(stock)) => parts.push(stock.clone()),
        (None, None) => {}
    }
    if let Some(price) = summary.price {
        let currency = summary.currency.as_deref().unwrap_or("");
        parts.push(format!("price {price} {currency}").trim_end().to_string());
    }
    if let Some(movement) = &summary.price_movement {
        if let (Some(direction), Some(percentage)) = (&movement.movement, movement.percentage) {
            parts.push(format!("{} {percentage}% today", direction.to_lowercase()));
        }
    }
    if parts.is_empty() {
        "no quote details available".to_string()
    } else {
        parts.join(", ")
    }
}

#[derive(Debug, Deserialize)]
struct FinanceSearchResponse {
    summary: Option<QuoteSummary>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    title: Option<String>,
    stock: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    price_movement: Option<PriceMovement>,
}

#[derive(Debug, Deserialize)]
struct PriceMovement {
    percentage: Option<f64>,
    movement: Option<String>,
}

/// Real-time currency exchange rates backed by the Alpha Vantage
/// `CURRENCY_EXCHANGE_RATE` endpoint.
#[derive(Debug)]
pub struct CurrencyRateTool {
    http: Client,
    base_url: String,
    api_key: String,
}

impl CurrencyRateTool {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(ALPHA_VANTAGE_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Tool for CurrencyRateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: CURRENCY_TOOL_NAME.into(),
            description: "Retrieve the real-time exchange rate between two currencies.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "from_currency": {
                        "type": "string",
                        "description": "ISO code of the source currency, e.g. \"USD\""
                    },
                    "to_currency": {
                        "type": "string",
                        "description": "ISO code of the target currency, e.g. \"EUR\""
                    }
                },
                "required": ["from_currency", "to_currency"]
            }),
        }
    }

    async fn call(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        let from = required_str(CURRENCY_TOOL_NAME, arguments, "from_currency")?;
        let to = required_str(CURRENCY_TOOL_NAME, arguments, "to_currency")?;
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        debug!(tool = CURRENCY_TOOL_NAME, from, to, "Querying exchange rate");

        let response: ExchangeRateResponse = self
            .http
            .get(url)
            .query(&[
                ("function", "CURRENCY_EXCHANGE_RATE"),
                ("from_currency", from),
                ("to_currency", to),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ToolError::execution(CURRENCY_TOOL_NAME, err))?
            .error_for_status()
            .map_err(|err| ToolError::execution(CURRENCY_TOOL_NAME, err))?
            .json()
            .await
            .map_err(|err| ToolError::execution(CURRENCY_TOOL_NAME, err))?;

        let rate = response.rate.ok_or_else(|| {
            ToolError::execution(
                CURRENCY_TOOL_NAME,
                format!("no exchange rate returned for {from}/{to}"),
            )
        })?;
        Ok(summarize_rate(&rate))
    }
}

fn summarize_rate(rate: &RealtimeRate) -> String {
    let mut text = format!(
        "1 {} = {} {}",
        rate.from_code, rate.exchange_rate, rate.to_code
    );
    if let Some(refreshed) = &rate.last_refreshed {
        text.push_str(&format!(" (as of {refreshed} UTC)"));
    }
    text
}

#[derive(Debug, Deserialize)]
struct ExchangeRateResponse {
    #[serde(rename = "Realtime Currency Exchange Rate")]
    rate: Option<RealtimeRate>,
}

#[derive(Debug, Deserialize)]
struct RealtimeRate {
    #[serde(rename = "1. From_Currency Code")]
    from_code: String,
    #[serde(rename = "3. To_Currency Code")]
    to_code: String,
    #[serde(rename = "5. Exchange Rate")]
    exchange_rate: String,
    #[serde(rename = "6. Last Refreshed")]
    last_refreshed: Option<String>,
}
