use super::{SemanticEvent, StreamingReconstructor, StructuredCall};
use crate::llm::ChatChunk;
use serde_json::{json, Map, Value};

// Split a string into chunks of at most `chunk_size` characters
pub fn chunk_str(s: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect()
}

pub fn content_chunk(text: &str) -> ChatChunk {
    ChatChunk::with_delta(json!({ "content": text }))
}

/// Chunk carrying a function call fragment, with the name only when given
pub fn call_chunk(name: Option<&str>, arguments: &str) -> ChatChunk {
    let mut function_call = Map::new();
    if let Some(name) = name {
        function_call.insert("name".to_string(), Value::String(name.to_string()));
    }
    function_call.insert("arguments".to_string(), Value::String(arguments.to_string()));
    ChatChunk::with_delta(json!({ "function_call": function_call }))
}

/// Stream a whole call: the name first, then the arguments text in pieces
pub fn call_chunks(name: &str, arguments: &str, chunk_size: usize) -> Vec<ChatChunk> {
    let mut chunks = vec![call_chunk(Some(name), "")];
    chunks.extend(
        chunk_str(arguments, chunk_size)
            .iter()
            .map(|piece| call_chunk(None, piece)),
    );
    chunks
}

/// Events produced per chunk, plus the call decoded when the stream ended
pub struct Reconstruction {
    pub per_chunk: Vec<Vec<SemanticEvent>>,
    pub call: Option<StructuredCall>,
}

impl Reconstruction {
    pub fn events(&self) -> Vec<SemanticEvent> {
        self.per_chunk.iter().flatten().cloned().collect()
    }

    pub fn code(&self) -> String {
        self.events()
            .iter()
            .filter_map(|event| match event {
                SemanticEvent::Code(code) => Some(code.as_str()),
                _ => None,
            })
            .collect()
    }
}

pub fn reconstruct(chunks: &[ChatChunk]) -> Reconstruction {
    let mut reconstructor = StreamingReconstructor::new();
    let per_chunk = chunks
        .iter()
        .map(|chunk| reconstructor.process_chunk(chunk))
        .collect();
    let call = reconstructor.finish();
    Reconstruction { per_chunk, call }
}
