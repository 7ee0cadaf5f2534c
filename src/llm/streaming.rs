//! Streaming infrastructure for the chat completion transport
//!
//! Raw bytes come from a [`ChunkStream`] (a live HTTP response or a recorded
//! playback) and are decoded as server-sent events into [`ChatChunk`]s by
//! [`ChatCompletionStream`], so both sources go through identical processing.

use crate::llm::recording::{APIRecorder, RecordedChunk};
use crate::llm::{ApiError, ApiErrorContext, ChatChunk};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Response;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Trait for streaming chunk sources (real HTTP response or recorded playback)
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Real HTTP response chunk stream
pub struct HttpChunkStream {
    pub response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(ApiErrorContext {
                error: ApiError::NetworkError(format!("HTTP chunk error: {e}")),
                retry_after: None,
            }
            .into()),
        }
    }
}

/// Recorded chunk stream for playback
pub struct PlaybackChunkStream {
    chunks: VecDeque<RecordedChunk>,
    start_time: Instant,
    fast_mode: bool,
}

impl PlaybackChunkStream {
    pub fn new(chunks: Vec<RecordedChunk>, fast_mode: bool) -> Self {
        Self {
            chunks: chunks.into(),
            start_time: Instant::now(),
            fast_mode,
        }
    }
}

#[async_trait]
impl ChunkStream for PlaybackChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(chunk) = self.chunks.pop_front() else {
            return Ok(None);
        };

        // Either respect original timing or just yield between chunks
        if !self.fast_mode {
            let elapsed = self.start_time.elapsed();
            let expected_time = Duration::from_millis(chunk.timestamp_ms);
            if elapsed < expected_time {
                tokio::time::sleep(expected_time - elapsed).await;
            }
        } else {
            tokio::task::yield_now().await;
        }

        Ok(Some(format!("data: {}\n\n", chunk.data).into_bytes()))
    }
}

/// In-memory chunk stream, serves already decoded chunks as SSE lines
pub struct MemoryChunkStream {
    chunks: VecDeque<ChatChunk>,
}

impl MemoryChunkStream {
    pub fn new(chunks: Vec<ChatChunk>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

#[async_trait]
impl ChunkStream for MemoryChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.chunks.pop_front() {
            Some(chunk) => {
                let data = serde_json::to_string(&chunk)?;
                Ok(Some(format!("data: {data}\n\n").into_bytes()))
            }
            None => Ok(None),
        }
    }
}

/// Decodes server-sent events from a [`ChunkStream`] into [`ChatChunk`]s
pub struct ChatCompletionStream {
    source: Box<dyn ChunkStream>,
    line_buffer: Vec<u8>,
    pending: VecDeque<ChatChunk>,
    recorder: Option<APIRecorder>,
    done: bool,
}

impl ChatCompletionStream {
    pub fn new(source: Box<dyn ChunkStream>) -> Self {
        Self {
            source,
            line_buffer: Vec::new(),
            pending: VecDeque::new(),
            recorder: None,
            done: false,
        }
    }

    /// Stream over chunks that are already in memory
    pub fn from_chunks(chunks: Vec<ChatChunk>) -> Self {
        Self::new(Box::new(MemoryChunkStream::new(chunks)))
    }

    /// Record every received data payload. The recording must already be started.
    pub fn with_recorder(mut self, recorder: APIRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Next decoded chunk, `None` once the stream is exhausted or `[DONE]` was seen
    pub async fn next_chunk(&mut self) -> Result<Option<ChatChunk>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.done {
                return Ok(None);
            }

            match self.source.next_chunk().await? {
                Some(bytes) => self.process_bytes(&bytes)?,
                None => {
                    // A final line may come without a trailing newline
                    if !self.line_buffer.is_empty() {
                        let line = std::mem::take(&mut self.line_buffer);
                        self.process_line(&String::from_utf8_lossy(&line))?;
                    }
                    self.finish();
                }
            }
        }
    }

    fn process_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.line_buffer.extend_from_slice(bytes);

        while let Some(pos) = self.line_buffer.iter().position(|b| *b == b'\n') {
            if self.done {
                self.line_buffer.clear();
                break;
            }
            let line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            self.process_line(&String::from_utf8_lossy(&line))?;
        }

        Ok(())
    }

    fn process_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\r', '\n']);

        // Blank separators, comments and `event:` lines carry nothing for us
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            self.finish();
            return Ok(());
        }

        if let Some(recorder) = &self.recorder {
            recorder.record_chunk(data)?;
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping undecodable stream event ({e}): '{data}'");
                return Ok(());
            }
        };

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ApiErrorContext {
                error: ApiError::ServiceError(message),
                retry_after: None,
            }
            .into());
        }

        match serde_json::from_value::<ChatChunk>(value) {
            Ok(chunk) => {
                debug!("Received stream event: '{}'", data);
                self.pending.push_back(chunk);
            }
            Err(e) => warn!("Skipping stream event with unexpected shape ({e}): '{data}'"),
        }

        Ok(())
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.end_recording() {
                warn!("Failed to save recording: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Serves fixed byte slices, split wherever the test wants
    struct ByteChunks(VecDeque<Vec<u8>>);

    #[async_trait]
    impl ChunkStream for ByteChunks {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.0.pop_front())
        }
    }

    fn stream_of(parts: &[&[u8]]) -> ChatCompletionStream {
        ChatCompletionStream::new(Box::new(ByteChunks(
            parts.iter().map(|p| p.to_vec()).collect(),
        )))
    }

    async fn collect(mut stream: ChatCompletionStream) -> Result<Vec<ChatChunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    #[tokio::test]
    async fn test_lines_split_across_reads() -> Result<()> {
        let stream = stream_of(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He",
            b"llo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\n",
            b"\ndata: [DONE]\n\n",
        ]);

        let chunks = collect(stream).await?;
        assert_eq!(
            chunks,
            vec![
                ChatChunk::with_delta(json!({"content": "Hello"})),
                ChatChunk::with_delta(json!({"content": "!"})),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_multibyte_characters_split_across_reads() -> Result<()> {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = line.len() - 7; // inside the two-byte "é"
        let stream = stream_of(&[&line[..split], &line[split..]]);

        let chunks = collect(stream).await?;
        assert_eq!(chunks, vec![ChatChunk::with_delta(json!({"content": "café"}))]);
        Ok(())
    }

    #[tokio::test]
    async fn test_noise_is_skipped_and_done_ends_stream() -> Result<()> {
        let stream = stream_of(&[
            b": keep-alive\n\nevent: ping\ndata: not json\n\n",
            b"data: {\"choices\":[]}\n\ndata: [DONE]\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ]);

        let chunks = collect(stream).await?;
        assert_eq!(chunks, vec![ChatChunk::default()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_final_line_without_newline() -> Result<()> {
        let stream = stream_of(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"]);
        let chunks = collect(stream).await?;
        assert_eq!(chunks.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_event_is_surfaced() {
        let stream = stream_of(&[b"data: {\"error\":{\"message\":\"model overloaded\"}}\n\n"]);
        let err = collect(stream).await.unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_playback_source_round_trip() -> Result<()> {
        let recorded = vec![
            RecordedChunk {
                data: r#"{"choices":[{"delta":{"content":"a"}}]}"#.to_string(),
                timestamp_ms: 0,
            },
            RecordedChunk {
                data: r#"{"choices":[{"delta":{"content":"b"}}]}"#.to_string(),
                timestamp_ms: 5,
            },
        ];
        let stream =
            ChatCompletionStream::new(Box::new(PlaybackChunkStream::new(recorded, false)));

        let chunks = collect(stream).await?;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].delta().unwrap()["content"], "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_recorder_captures_payloads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rec.json");
        let recorder = APIRecorder::new(&path);
        recorder.start_recording(json!({"model": "m"}))?;

        let stream = ChatCompletionStream::from_chunks(vec![
            ChatChunk::with_delta(json!({"content": "a"})),
            ChatChunk::with_delta(json!({"content": "b"})),
        ])
        .with_recorder(recorder);
        collect(stream).await?;

        let playback = crate::llm::recording::PlaybackState::from_file(&path, true)?;
        let session = playback.next_session().unwrap();
        assert_eq!(session.chunks.len(), 2);
        Ok(())
    }
}
