use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Role of a message as understood by the chat completion API
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    System,
    User,
    Assistant,
    Function,
}

/// Function call envelope attached to an assistant message
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WireFunctionCall {
    pub name: String,
    /// JSON encoded arguments, kept as text the way the API expects them
    pub arguments: String,
}

/// A message in the chat completion wire format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: String,
    /// Function name, only set on function result messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<WireFunctionCall>,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: WireRole::System,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: WireRole::Function,
            content: content.into(),
            name: Some(name.into()),
            function_call: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Provider independent request for one streamed completion
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    pub functions: Vec<FunctionDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// One frame of a streamed chat completion.
///
/// The delta is kept as a generic JSON object so that successive frames can
/// be folded together without knowing which fields a provider sends.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatChunk {
    /// Chunk with a single choice carrying `delta`. Non-object values give an empty delta.
    pub fn with_delta(delta: Value) -> Self {
        let delta = match delta {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            choices: vec![ChunkChoice {
                delta,
                finish_reason: None,
            }],
        }
    }

    /// Delta of the first choice, the only one this client asks for
    pub fn delta(&self) -> Option<&Map<String, Value>> {
        self.choices.first().map(|choice| &choice.delta)
    }
}

/// Common error types for the chat completion transport
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// API error together with the server's retry hint, if it sent one
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ApiErrorContext {
    pub error: ApiError,
    pub retry_after: Option<Duration>,
}
