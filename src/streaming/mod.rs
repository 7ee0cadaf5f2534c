//! Reconstruction of function calls from a streamed chat completion
//!
//! Chunks are folded into a cumulative delta, the growing `arguments` text is
//! re-parsed with a tolerant JSON parser, and the result is surfaced as an
//! ordered sequence of [`SemanticEvent`]s while the response is still arriving.

mod delta;
mod partial_json;
mod reconstructor;

#[cfg(test)]
mod test_utils;

pub use delta::merge_delta;
pub use partial_json::parse_partial_json;
pub use reconstructor::{ReconstructionPhase, StreamingReconstructor};

use crate::llm::ChatCompletionStream;
use anyhow::Result;
use futures::Stream;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::VecDeque;

/// Name of the code execution function
pub const EXECUTE_FUNCTION: &str = "execute";
/// Name of the domain question function
pub const QA_FUNCTION: &str = "qa";

/// One unit of reconstructed output, serialized as a single-key record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticEvent {
    /// Free text from the assistant
    Message(String),
    /// Language of the code that follows, emitted once per call
    Language(String),
    /// Code appended since the previous code event
    Code(String),
    Category(String),
    Question(String),
    /// The question call is complete
    Finished,
}

impl SemanticEvent {
    pub fn key(&self) -> &'static str {
        match self {
            SemanticEvent::Message(_) => "message",
            SemanticEvent::Language(_) => "language",
            SemanticEvent::Code(_) => "code",
            SemanticEvent::Category(_) => "category",
            SemanticEvent::Question(_) => "question",
            SemanticEvent::Finished => "finished",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SemanticEvent::Message(text)
            | SemanticEvent::Language(text)
            | SemanticEvent::Code(text)
            | SemanticEvent::Category(text)
            | SemanticEvent::Question(text) => text,
            SemanticEvent::Finished => "yes",
        }
    }
}

impl Serialize for SemanticEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.key(), self.value())?;
        map.end()
    }
}

/// Arguments of an `execute` call. Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutePayload {
    pub language: String,
    pub code: String,
}

/// Arguments of a `qa` call. Field order is the serialized order, `finished` last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPayload {
    pub category: String,
    pub question: String,
    pub finished: String,
}

impl QaPayload {
    pub fn new(category: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            question: question.into(),
            finished: "yes".to_string(),
        }
    }
}

/// A function call decoded from one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredCall {
    Execute(ExecutePayload),
    Qa(QaPayload),
    /// A function the model made up. Its raw arguments are treated as code.
    Unknown { name: String, raw: String },
}

impl StructuredCall {
    /// Language and code to run, if this call asks for execution
    pub fn as_execution(&self) -> Option<(&str, &str)> {
        match self {
            StructuredCall::Execute(payload) => Some((&payload.language, &payload.code)),
            StructuredCall::Unknown { name, raw } => Some((name, raw)),
            StructuredCall::Qa(_) => None,
        }
    }
}

struct EventStreamState {
    stream: ChatCompletionStream,
    reconstructor: StreamingReconstructor,
    pending: VecDeque<SemanticEvent>,
    done: bool,
}

/// Turn a completion stream into its semantic events.
///
/// Dropping the returned stream abandons the transport and the partial state.
pub fn semantic_events(
    stream: ChatCompletionStream,
) -> impl Stream<Item = Result<SemanticEvent>> + Send {
    let state = EventStreamState {
        stream,
        reconstructor: StreamingReconstructor::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    let events = state.reconstructor.process_chunk(&chunk);
                    state.pending.extend(events);
                }
                Ok(None) => {
                    state.reconstructor.finish();
                    state.done = true;
                }
                Err(e) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}
