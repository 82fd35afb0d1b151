use super::model::{ChatMessage, LanguageModel, TextStream};
use super::{LlmError, LlmResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

/// Configuration for LlmClient loaded from environment variables
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String, // e.g., https://api.openai.com/v1
    pub model: String,    // chat + streaming
    pub function_model: String,
    pub embedding_model: String,
    pub image_size: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub temperature: f32,
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: env_or("OPENAI_MODEL", "gpt-4-0613"),
            function_model: env_or("OPENAI_FUNCTION_MODEL", "gpt-3.5-turbo-16k-0613"),
            embedding_model: env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-ada-002"),
            image_size: env_or("OPENAI_IMAGE_SIZE", "1024x1024"),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
            temperature: std::env::var("OPENAI_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .unwrap_or(0.7),
        }
    }
}

/// Assistant output of one chat completion, with any tool calls it requested
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatCompletion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub model: Option<String>,
}

/// Tool call parsed from model output; `arguments` is left as the raw JSON
/// text the model produced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// HTTP client for OpenAI-compatible chat, embedding and image endpoints
#[derive(Clone)]
pub struct LlmClient {
    pub(crate) http: Client,
    pub(crate) cfg: LlmClientConfig,
}

impl LlmClient {
    pub fn new(cfg: LlmClientConfig) -> LlmResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| LlmError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> LlmResult<Self> {
        Self::new(LlmClientConfig::default())
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.cfg
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> LlmResult<Value> {
        let url = self.url(path);
        debug!(target: "llm_client", "POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Http(format!("{path} request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            error!(target: "llm_client", %status, body = %body, "{} error", path);
            return Err(LlmError::Status { status, body });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse {path} JSON: {e}")))
    }

    /// Chat completion with the given tool schemas exposed as functions
    pub async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> LlmResult<ChatCompletion> {
        let mut body = json!({
            "model": self.cfg.function_model,
            "messages": messages,
            "temperature": self.cfg.temperature,
        });
        if !tools.is_empty() {
            let wrapped: Vec<Value> = tools
                .iter()
                .map(|t| json!({"type": "function", "function": t}))
                .collect();
            body["tools"] = Value::Array(wrapped);
            body["tool_choice"] = json!("auto");
        }
        let val = self.post_json("chat/completions", &body).await?;
        Ok(ChatCompletion {
            text: extract_text_from_chat_completions(&val),
            tool_calls: parse_tool_calls_from_chat(&val),
            model: val.get("model").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> LlmResult<String> {
        let body = json!({
            "model": self.cfg.model,
            "messages": messages,
            "temperature": self.cfg.temperature,
        });
        let val = self.post_json("chat/completions", &body).await?;
        extract_text_from_chat_completions(&val).ok_or_else(|| {
            LlmError::Parse("Missing choices[0].message.content in chat completions".into())
        })
    }

    async fn stream(&self, messages: &[ChatMessage]) -> LlmResult<TextStream> {
        let url = self.url("chat/completions");
        debug!(target: "llm_client", "POST {} (stream)", url);

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let body = json!({
            "model": self.cfg.model,
            "messages": messages,
            "temperature": self.cfg.temperature,
            "stream": true,
        });
        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(format!("stream request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let mut bytes = Box::pin(resp.bytes_stream());
        let deltas = async_stream::stream! {
            let mut lines = SseLineBuffer::default();
            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::Http(format!("stream interrupted: {e}")));
                        break;
                    }
                };
                for line in lines.push(&chunk) {
                    match parse_sse_line(line.trim()) {
                        SseLine::Delta(text) => yield Ok(text),
                        SseLine::Done => break 'outer,
                        SseLine::Skip => {}
                    }
                }
            }
        };
        Ok(Box::pin(deltas))
    }

    async fn embed(&self, text: &str) -> LlmResult<Vec<f32>> {
        let body = json!({
            "model": self.cfg.embedding_model,
            "input": text,
        });
        let val = self.post_json("embeddings", &body).await?;
        let values = val
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| LlmError::Parse("Missing data[0].embedding".into()))?;
        Ok(values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect())
    }

    async fn create_image(&self, prompt: &str) -> LlmResult<String> {
        let body = json!({
            "prompt": prompt,
            "n": 1,
            "size": self.cfg.image_size,
        });
        let val = self.post_json("images/generations", &body).await?;
        val.get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("url"))
            .and_then(|u| u.as_str())
            .map(String::from)
            .ok_or_else(|| {
                warn!(target: "llm_client", "Image response without url");
                LlmError::Parse("Missing data[0].url in image response".into())
            })
    }
}

/// Accumulates raw stream bytes and hands back complete lines.
///
/// Bytes are only decoded once a full `\n`-terminated line is present, so a
/// multi-byte character split across network chunks survives intact.
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=idx).collect();
            match std::str::from_utf8(&raw) {
                Ok(line) => lines.push(line.to_string()),
                Err(e) => {
                    warn!(target: "llm_client", error = %e, "Dropping non UTF-8 stream line");
                }
            }
        }
        lines
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Interpret one line of a streamed chat completion
pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(val) = serde_json::from_str::<Value>(data) else {
        return SseLine::Skip;
    };
    match val
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => SseLine::Delta(text.to_string()),
        _ => SseLine::Skip,
    }
}

pub fn extract_text_from_chat_completions(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Parse `choices[0].message.tool_calls`, falling back to the legacy
/// single `function_call` field
pub fn parse_tool_calls_from_chat(v: &Value) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let Some(message) = v
        .get("choices")
        .and_then(|x| x.get(0))
        .and_then(|c| c.get("message"))
    else {
        return calls;
    };

    let mut push = |id: Option<String>, func: &Value| {
        let name = func
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string();
        let arguments = match func.get("arguments") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        if !name.is_empty() {
            calls.push(ToolCall {
                id,
                name,
                arguments,
            });
        }
    };

    if let Some(tc_arr) = message.get("tool_calls").and_then(|x| x.as_array()) {
        for tc in tc_arr {
            let id = tc.get("id").and_then(|x| x.as_str()).map(|s| s.to_string());
            if let Some(func) = tc.get("function") {
                push(id, func);
            }
        }
    } else if let Some(func) = message.get("function_call") {
        push(None, func);
    }
    calls
}
