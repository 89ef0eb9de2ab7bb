use super::{Tool, ToolError};
use crate::types::ToolSpec;
use async_trait::async_trait;
use serde_json::{Map, Value, json};

const TOOL_NAME: &str = "calculator";

/// In-process arithmetic evaluator: sandboxed by construction, it parses and
/// computes plain numeric expressions without touching the host environment.
#[derive(Debug)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_NAME.into(),
            description: "Evaluate a basic arithmetic expression for finance calculations \
                          (returns, averages, conversions). Supports + - * / % ^ and parentheses."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Arithmetic expression, e.g. \"5000 * 1.07 ^ 4\""
                    }
                },
                "required": ["expression"]
            }),
        }
    }

    async fn call(&self, arguments: &Map<String, Value>) -> Result<String, ToolError> {
        let expression = arguments
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: TOOL_NAME.into(),
                reason: "missing required argument 'expression'".into(),
            })?;

        let value = evaluate(expression).map_err(|reason| ToolError::execution(TOOL_NAME, reason))?;
        Ok(format_number(value))
    }
}

pub(crate) fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = Parser::new(expression);
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.position < parser.input.len() {
        return Err(format!(
            "unexpected character '{}' at offset {}",
            parser.input[parser.position], parser.position
        ));
    }
    if !value.is_finite() {
        return Err("expression does not evaluate to a finite number".into());
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Recursive-descent parser over `+ - * / % ^`, unary minus, parentheses,
/// and decimal literals. Precedence: `^` (right-assoc) over `* / %` over
/// `+ -`.
struct Parser {
    input: Vec<char>,
    position: usize,
}

impl Parser {
    fn new(expression: &str) -> Self {
        Self {
            input: expression.chars().collect(),
            position: 0,
        }
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            match self.peek_operator() {
                Some('+') => {
                    self.position += 1;
                    value += self.term()?;
                }
                Some('-') => {
                    self.position += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        loop {
            match self.peek_operator() {
                Some('*') => {
                    self.position += 1;
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.position += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".into());
                    }
                    value /= divisor;
                }
                Some('%') => {
                    self.position += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".into());
                    }
                    value %= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.peek_operator() == Some('^') {
            self.position += 1;
            // Right-associative exponent.
            let exponent = self.factor()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.peek_operator() == Some('-') {
            self.position += 1;
            return Ok(-self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.input.get(self.position) {
            Some('(') => {
                self.position += 1;
                let value = self.expression()?;
                self.skip_whitespace();
                if self.input.get(self.position) != Some(&')') {
                    return Err("missing closing parenthesis".into());
                }
                self.position += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.number(),
            Some(c) => Err(format!(
                "unexpected character '{c}' at offset {}",
                self.position
            )),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.position;
        while self
            .input
            .get(self.position)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        {
            self.position += 1;
        }
        let literal: String = self.input[start..self.position]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        literal
            .parse::<f64>()
            .map_err(|_| format!("invalid number literal '{literal}'"))
    }

    fn peek_operator(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.input.get(self.position).copied()
    }

    fn skip_whitespace(&mut self) {
        while self
            .input
            .get(self.position)
            .is_some_and(|c| c.is_whitespace())
        {
            self.position += 1;
        }
    }
}
