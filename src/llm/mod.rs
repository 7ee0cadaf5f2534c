//! Chat completion transport
//!
//! This module implements:
//! - The `LLMProvider` trait the interpreter streams completions through
//! - An OpenAI compatible client using the `functions` calling convention
//! - SSE decoding shared by live responses and recorded playback
//! - Recording of responses for debugging and offline replay


mod utils;

pub mod openai;
pub mod recording;
pub mod streaming;
pub mod types;

pub use openai::OpenAIClient;
pub use streaming::ChatCompletionStream;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for chat completion providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Start a streamed completion. Dropping the returned stream abandons the response.
    async fn stream_completion(&self, request: ChatRequest) -> Result<ChatCompletionStream>;
}
