use crate::catalog::{Function, FunctionError, FunctionResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CalculatorArgs {
    expression: String,
}

/// Arithmetic over `+ - * /`, parentheses, unary minus and decimals
#[derive(Debug, Default)]
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Function for Calculator {
    fn name(&self) -> String {
        "calculator".to_string()
    }

    fn description(&self) -> String {
        "Evaluates an arithmetic expression such as `(2 + 3) * 4` and returns the numeric result."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression using + - * / and parentheses"
                }
            },
            "required": ["expression"]
        })
    }

    async fn call(&self, arguments: Value) -> FunctionResult<Value> {
        let args: CalculatorArgs = serde_json::from_value(arguments)
            .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?;
        let value = evaluate(&args.expression)?;
        debug!(target: "catalog", expression = %args.expression, result = value, "Evaluated expression");

        // Whole numbers come back as integers so "2+2" reads as 4, not 4.0
        let result = if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            json!(value as i64)
        } else {
            json!(value)
        };
        Ok(json!({ "expression": args.expression, "result": result }))
    }
}

/// Evaluate `expression`, rejecting trailing input and division by zero.
pub fn evaluate(expression: &str) -> FunctionResult<f64> {
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.chars.len() {
        return Err(FunctionError::InvalidArguments(format!(
            "unexpected '{}' at position {}",
            parser.chars[parser.pos], parser.pos
        )));
    }
    if !value.is_finite() {
        return Err(FunctionError::ExecutionFailed("result is not finite".into()));
    }
    Ok(value)
}

/// Deepest parenthesis nesting accepted before the expression is rejected
pub const MAX_NESTING: usize = 256;

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> FunctionResult<f64> {
        let mut acc = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> FunctionResult<f64> {
        let mut acc = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '*' {
                acc *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(FunctionError::ExecutionFailed("division by zero".into()));
                }
                acc /= rhs;
            }
        }
        Ok(acc)
    }

    // factor := ('-' | '+')* ('(' expr ')' | number)
    fn factor(&mut self) -> FunctionResult<f64> {
        let mut negate = false;
        while let Some(sign @ ('-' | '+')) = self.peek() {
            self.pos += 1;
            negate ^= sign == '-';
        }
        let value = self.primary()?;
        Ok(if negate { -value } else { value })
    }

    fn primary(&mut self) -> FunctionResult<f64> {
        match self.peek() {
            Some('(') => {
                if self.depth >= MAX_NESTING {
                    return Err(FunctionError::InvalidArguments(
                        "expression nested too deeply".into(),
                    ));
                }
                self.pos += 1;
                self.depth += 1;
                let value = self.expr()?;
                self.depth -= 1;
                if self.peek() != Some(')') {
                    return Err(FunctionError::InvalidArguments("missing ')'".into()));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(FunctionError::InvalidArguments(format!(
                "unexpected '{}' at position {}",
                c, self.pos
            ))),
            None => Err(FunctionError::InvalidArguments(
                "unexpected end of expression".into(),
            )),
        }
    }

    fn number(&mut self) -> FunctionResult<f64> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| FunctionError::InvalidArguments(format!("bad number '{}'", literal)))
    }
}
