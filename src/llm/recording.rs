use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// Recording session that contains the original request and all chunks
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordingSession {
    /// The request body that was sent
    pub request: serde_json::Value,
    /// Timestamp of when the recording was started
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// SSE data payloads as received from the API
    pub chunks: Vec<RecordedChunk>,
}

/// Single recorded chunk with timing info
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedChunk {
    /// Raw content of the data part of the SSE line
    pub data: String,
    /// Milliseconds since recording start
    pub timestamp_ms: u64,
}

struct ActiveRecording {
    session: RecordingSession,
    started: Instant,
}

/// Records streamed responses into a JSON array of sessions.
///
/// Clones share the same in-progress session.
#[derive(Clone)]
pub struct APIRecorder {
    file_path: PathBuf,
    current: Arc<Mutex<Option<ActiveRecording>>>,
}

impl APIRecorder {
    /// Create a new recorder that writes to the specified file
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a new recording session, discarding any unfinished one
    pub fn start_recording(&self, request: serde_json::Value) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("Recorder state poisoned"))?;

        *current = Some(ActiveRecording {
            session: RecordingSession {
                request,
                timestamp: chrono::Utc::now(),
                chunks: Vec::new(),
            },
            started: Instant::now(),
        });

        Ok(())
    }

    /// Record an incoming SSE data payload
    pub fn record_chunk(&self, data: &str) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("Recorder state poisoned"))?;

        if let Some(active) = current.as_mut() {
            let timestamp_ms = active.started.elapsed().as_millis() as u64;
            active.session.chunks.push(RecordedChunk {
                data: data.to_string(),
                timestamp_ms,
            });
        }

        Ok(())
    }

    /// End the current recording session and append it to the file
    pub fn end_recording(&self) -> Result<()> {
        let finished = self
            .current
            .lock()
            .map_err(|_| anyhow!("Recorder state poisoned"))?
            .take();

        let Some(active) = finished else {
            return Ok(());
        };

        let mut sessions = if self.file_path.exists() {
            let contents = std::fs::read_to_string(&self.file_path)
                .context("Failed to read recording file")?;
            if contents.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str::<Vec<RecordingSession>>(&contents)
                    .context("Failed to parse recording file")?
            }
        } else {
            Vec::new()
        };

        debug!(
            "Saving recording with {} chunks to {}",
            active.session.chunks.len(),
            self.file_path.display()
        );
        sessions.push(active.session);

        let json = serde_json::to_string_pretty(&sessions)?;
        std::fs::write(&self.file_path, json).context("Failed to write recording file")?;

        Ok(())
    }
}

/// Playback of recorded sessions, one session per request, in file order
#[derive(Clone)]
pub struct PlaybackState {
    sessions: Arc<Vec<RecordingSession>>,
    index: Arc<Mutex<usize>>,
    pub fast: bool,
}

impl PlaybackState {
    pub fn from_file<P: AsRef<Path>>(path: P, fast: bool) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).context("Failed to read recording file")?;
        let sessions: Vec<RecordingSession> =
            serde_json::from_str(&contents).context("Failed to parse recording file")?;
        Ok(Self::from_sessions(sessions, fast))
    }

    pub fn from_sessions(sessions: Vec<RecordingSession>, fast: bool) -> Self {
        Self {
            sessions: Arc::new(sessions),
            index: Arc::new(Mutex::new(0)),
            fast,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Take the next session, or None if exhausted
    pub fn next_session(&self) -> Option<RecordingSession> {
        let mut idx = self.index.lock().ok()?;
        let session = self.sessions.get(*idx)?.clone();
        *idx += 1;
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_playback_state_sequences_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playback.json");
        let json = r#"[
  {
    "request": {"foo": 1},
    "timestamp": "2024-01-01T00:00:00Z",
    "chunks": [
      {"data": "{\"choices\":[]}", "timestamp_ms": 0}
    ]
  },
  {
    "request": {"bar": 2},
    "timestamp": "2024-01-01T00:00:01Z",
    "chunks": [
      {"data": "{\"choices\":[]}", "timestamp_ms": 10}
    ]
  }
]
"#;
        std::fs::write(&path, json).unwrap();

        let state = PlaybackState::from_file(&path, true).unwrap();
        assert_eq!(state.session_count(), 2);

        let s1 = state.next_session().unwrap();
        assert_eq!(s1.request["foo"], 1);
        assert_eq!(s1.chunks.len(), 1);

        let s2 = state.next_session().unwrap();
        assert_eq!(s2.request["bar"], 2);

        assert!(state.next_session().is_none());
    }

    #[test]
    fn test_recorder_appends_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        let recorder = APIRecorder::new(&path);

        recorder.start_recording(json!({"model": "a"})).unwrap();
        recorder.record_chunk(r#"{"choices":[]}"#).unwrap();
        recorder.end_recording().unwrap();

        recorder.start_recording(json!({"model": "b"})).unwrap();
        recorder.record_chunk("first").unwrap();
        recorder.record_chunk("second").unwrap();
        recorder.end_recording().unwrap();

        // Nothing in progress, nothing written
        recorder.end_recording().unwrap();

        let state = PlaybackState::from_file(&path, true).unwrap();
        assert_eq!(state.session_count(), 2);
        assert_eq!(state.next_session().unwrap().request["model"], "a");

        let second = state.next_session().unwrap();
        let data: Vec<_> = second.chunks.iter().map(|c| c.data.as_str()).collect();
        assert_eq!(data, vec!["first", "second"]);
    }
}
