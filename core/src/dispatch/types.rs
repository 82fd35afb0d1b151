use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of resolving a request: a named function result, or a plain
/// reply under the `"chat"` sentinel name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub name: String,
    pub data: Value,
}

impl DispatchResult {
    pub const CHAT: &'static str = "chat";

    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(Self::CHAT, Value::String(text.into()))
    }

    pub fn is_chat(&self) -> bool {
        self.name == Self::CHAT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// `{status, message}` body used for HTTP replies and failed dispatches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub status: Status,
    pub message: String,
}

impl StatusEnvelope {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }
}

/// What goes on the wire for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusPayload {
    Failed(StatusEnvelope),
    Resolved(DispatchResult),
}
