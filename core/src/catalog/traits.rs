use super::error::FunctionResult;
use async_trait::async_trait;
use serde_json::{json, Value};

/// A callable entry in the function catalog
#[async_trait]
pub trait Function: Send + Sync {
    /// The unique snake_case name the model calls (e.g., "calculator")
    fn name(&self) -> String;

    /// A human-readable description of what the function does
    fn description(&self) -> String;

    /// The JSON Schema for the function's arguments
    fn parameters(&self) -> Value;

    /// Execute the function with the given arguments
    async fn call(&self, arguments: Value) -> FunctionResult<Value>;

    /// Schema entry in the shape chat-completion providers expect
    fn schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": self.parameters(),
        })
    }
}
