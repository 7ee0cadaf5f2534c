use crate::llm::recording::{APIRecorder, PlaybackState};
use crate::llm::streaming::{ChatCompletionStream, HttpChunkStream, PlaybackChunkStream};
use crate::llm::{
    utils, ApiError, ApiErrorContext, ChatRequest, FunctionDefinition, LLMProvider, WireMessage,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<&'a [FunctionDefinition]>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Chat completion client for OpenAI compatible endpoints using the
/// `functions` calling convention.
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
    recorder: Option<APIRecorder>,
    playback: Option<PlaybackState>,
}

impl OpenAIClient {
    pub fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    pub fn new(api_key: Option<String>, model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_retries: 3,
            recorder: None,
            playback: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Record every streamed response to the recorder's file
    pub fn with_recorder(mut self, recorder: APIRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Serve responses from recorded sessions instead of the network
    pub fn with_playback(mut self, playback: PlaybackState) -> Self {
        self.playback = Some(playback);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn get_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request_body(&self, request: &ChatRequest) -> Result<serde_json::Value> {
        let body = OpenAIRequest {
            model: &self.model,
            messages: &request.messages,
            functions: (!request.functions.is_empty()).then_some(request.functions.as_slice()),
            stream: true,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        Ok(serde_json::to_value(body)?)
    }

    async fn try_open_stream(&self, body: &serde_json::Value) -> Result<Response> {
        let mut request_builder = self
            .client
            .post(self.get_url())
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            request_builder = request_builder.bearer_auth(api_key);
        }

        let response = request_builder
            .json(body)
            .send()
            .await
            .map_err(|e| ApiErrorContext {
                error: ApiError::NetworkError(e.to_string()),
                retry_after: None,
            })?;

        utils::check_response_error(response).await
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn stream_completion(&self, request: ChatRequest) -> Result<ChatCompletionStream> {
        if let Some(playback) = &self.playback {
            let session = playback
                .next_session()
                .ok_or_else(|| anyhow!("No more recorded sessions to play back"))?;
            debug!("Playing back recorded session from {}", session.timestamp);
            return Ok(ChatCompletionStream::new(Box::new(
                PlaybackChunkStream::new(session.chunks, playback.fast),
            )));
        }

        let body = self.build_request_body(&request)?;
        debug!("Sending streaming request: {}", body);

        let mut attempts = 0;
        let response = loop {
            attempts += 1;
            match self.try_open_stream(&body).await {
                Ok(response) => break response,
                Err(e) => {
                    if utils::handle_retryable_error(&e, attempts, self.max_retries).await {
                        continue;
                    }
                    return Err(e);
                }
            }
        };

        let stream = ChatCompletionStream::new(Box::new(HttpChunkStream::new(response)));
        match &self.recorder {
            Some(recorder) => {
                recorder.start_recording(body)?;
                Ok(stream.with_recorder(recorder.clone()))
            }
            None => Ok(stream),
        }
    }
}
