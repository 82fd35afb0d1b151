use super::LlmResult;
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Incremental text deltas of a streamed reply
pub type TextStream = Pin<Box<dyn Stream<Item = LlmResult<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The provider capabilities the rest of the crate consumes
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String>;

    async fn stream(&self, messages: &[ChatMessage]) -> LlmResult<TextStream>;

    async fn embed(&self, text: &str) -> LlmResult<Vec<f32>>;

    /// Generate one image and return its URL
    async fn create_image(&self, prompt: &str) -> LlmResult<String>;
}
