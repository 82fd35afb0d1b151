use super::types::DispatchResult;
use crate::catalog::{FunctionCatalog, FunctionError};
use crate::llm::{ChatCompletion, ChatMessage, LlmClient, LlmError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("Function {0} not found")]
    UnknownFunction(String),

    #[error("malformed arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("function {name} failed: {source}")]
    Function {
        name: String,
        #[source]
        source: FunctionError,
    },

    #[error("model returned neither a function call nor a reply")]
    EmptyResponse,
}

/// Resolves user text into a [`DispatchResult`] against a function catalog
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn resolve(
        &self,
        text: &str,
        system_context: &str,
        catalog: &FunctionCatalog,
    ) -> Result<DispatchResult, DispatchError>;
}

/// Dispatcher backed by a chat-completion model with the catalog exposed as tools
pub struct LlmDispatcher {
    client: Arc<LlmClient>,
}

impl LlmDispatcher {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatcher for LlmDispatcher {
    #[tracing::instrument(name = "llm_dispatcher.resolve", skip_all, fields(functions = catalog.len()))]
    async fn resolve(
        &self,
        text: &str,
        system_context: &str,
        catalog: &FunctionCatalog,
    ) -> Result<DispatchResult, DispatchError> {
        let messages = [ChatMessage::user(text), ChatMessage::system(system_context)];
        let completion = self
            .client
            .complete_with_tools(&messages, &catalog.schemas())
            .await?;
        debug!(target: "dispatch", calls = completion.tool_calls.len(), model = ?completion.model, "Model replied");
        resolve_completion(completion, catalog).await
    }
}

/// Turn a model completion into a dispatch result.
///
/// The first tool call is executed through `catalog`; a completion without
/// tool calls becomes the `"chat"` fallback.
pub async fn resolve_completion(
    completion: ChatCompletion,
    catalog: &FunctionCatalog,
) -> Result<DispatchResult, DispatchError> {
    let Some(call) = completion.tool_calls.first() else {
        return completion
            .text
            .map(DispatchResult::chat)
            .ok_or(DispatchError::EmptyResponse);
    };
    if completion.tool_calls.len() > 1 {
        warn!(target: "dispatch", ignored = completion.tool_calls.len() - 1, "Only the first function call is executed");
    }

    let arguments: Value = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.arguments).map_err(|e| DispatchError::InvalidArguments {
            name: call.name.clone(),
            reason: e.to_string(),
        })?
    };

    let data = catalog
        .call(&call.name, arguments)
        .await
        .map_err(|e| match e {
            FunctionError::NotFound(name) => DispatchError::UnknownFunction(name),
            FunctionError::InvalidArguments(reason) => DispatchError::InvalidArguments {
                name: call.name.clone(),
                reason,
            },
            other => DispatchError::Function {
                name: call.name.clone(),
                source: other,
            },
        })?;

    info!(target: "dispatch", function = %call.name, "Function call resolved");
    Ok(DispatchResult::new(call.name.clone(), data))
}
