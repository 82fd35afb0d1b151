//! LLM module: HTTP client and the capability trait it implements
//!
//! This module provides:
//! - `LlmClientConfig`, `LlmClient` for talking to OpenAI-compatible backends
//! - `LanguageModel`: complete / stream / embed / image, so callers can be faked in tests
//! - tool-call parsing helpers used by the function dispatcher

mod client;
mod model;

pub use client::{
    extract_text_from_chat_completions, parse_tool_calls_from_chat, ChatCompletion, LlmClient,
    LlmClientConfig, ToolCall,
};
pub use model::{ChatMessage, LanguageModel, Role, TextStream};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM HTTP error: {0}")]
    Http(String),

    #[error("LLM provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response parse error: {0}")]
    Parse(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;
