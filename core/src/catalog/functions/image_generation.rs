use crate::catalog::{Function, FunctionError, FunctionResult};
use crate::llm::LanguageModel;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ImageArgs {
    prompt: String,
}

/// Generates an image from a text prompt through the provider's image endpoint
pub struct ImageGeneration {
    model: Arc<dyn LanguageModel>,
}

impl ImageGeneration {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Function for ImageGeneration {
    fn name(&self) -> String {
        "image_generation".to_string()
    }

    fn description(&self) -> String {
        "Creates an image from the user's description. Use it when the user asks for a picture, \
         illustration or drawing."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The user input text"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn call(&self, arguments: Value) -> FunctionResult<Value> {
        let args: ImageArgs = serde_json::from_value(arguments)
            .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?;
        if args.prompt.trim().is_empty() {
            return Err(FunctionError::InvalidArguments("prompt is empty".into()));
        }
        let url = self
            .model
            .create_image(&args.prompt)
            .await
            .map_err(|e| FunctionError::ExecutionFailed(e.to_string()))?;
        info!(target: "catalog", url = %url, "Image generated");
        Ok(json!({ "prompt": args.prompt, "url": url }))
    }
}
