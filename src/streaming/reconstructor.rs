use super::{
    merge_delta, parse_partial_json, ExecutePayload, QaPayload, SemanticEvent, StructuredCall,
    EXECUTE_FUNCTION, QA_FUNCTION,
};
use crate::llm::ChatChunk;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

/// Where a reconstruction currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionPhase {
    /// No function call identified yet
    Idle,
    Execute,
    Qa,
    Unknown,
    /// The response has ended
    Complete,
}

/// The call shape, fixed for the rest of the response once identified
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallShape {
    Execute,
    Qa,
    Unknown(String),
}

/// Reconstruction context for a single response.
///
/// Create a fresh one per response, feed it every chunk in arrival order,
/// and call [`finish`](Self::finish) when the stream ends.
#[derive(Debug)]
pub struct StreamingReconstructor {
    accumulated: Map<String, Value>,
    shape: Option<CallShape>,
    language: Option<String>,
    emitted_code: String,
    qa: Option<QaPayload>,
    complete: bool,
}

impl Default for StreamingReconstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingReconstructor {
    pub fn new() -> Self {
        Self {
            accumulated: Map::new(),
            shape: None,
            language: None,
            emitted_code: String::new(),
            qa: None,
            complete: false,
        }
    }

    pub fn phase(&self) -> ReconstructionPhase {
        if self.complete {
            return ReconstructionPhase::Complete;
        }
        match self.shape {
            None => ReconstructionPhase::Idle,
            Some(CallShape::Execute) => ReconstructionPhase::Execute,
            Some(CallShape::Qa) => ReconstructionPhase::Qa,
            Some(CallShape::Unknown(_)) => ReconstructionPhase::Unknown,
        }
    }

    /// Everything merged from the deltas so far
    pub fn accumulated(&self) -> &Map<String, Value> {
        &self.accumulated
    }

    /// Accumulated `function_call.arguments` text
    pub fn arguments(&self) -> Option<&str> {
        self.function_call()?.get("arguments")?.as_str()
    }

    fn function_call(&self) -> Option<&Map<String, Value>> {
        self.accumulated.get("function_call")?.as_object()
    }

    /// Fold one chunk into the reconstruction and return the events it completes
    pub fn process_chunk(&mut self, chunk: &ChatChunk) -> Vec<SemanticEvent> {
        let mut events = Vec::new();

        if self.complete {
            warn!("Ignoring chunk received after the response ended");
            return events;
        }

        let Some(delta) = chunk.delta() else {
            trace!("Skipping chunk without choices");
            return events;
        };

        merge_delta(&mut self.accumulated, delta);

        if let Some(Value::String(content)) = delta.get("content") {
            if !content.is_empty() {
                events.push(SemanticEvent::Message(content.clone()));
            }
        }

        if self.shape.is_none() {
            self.shape = self.identify_call();
            if let Some(shape) = &self.shape {
                debug!("Identified function call: {:?}", shape);
            }
        }

        match self.shape.clone() {
            Some(CallShape::Execute) => self.advance_execute(&mut events),
            Some(CallShape::Qa) => self.advance_qa(&mut events),
            Some(CallShape::Unknown(name)) => self.advance_unknown(&name, &mut events),
            None => {}
        }

        events
    }

    /// Mark the response as ended and return the call it carried, if one was completed
    pub fn finish(&mut self) -> Option<StructuredCall> {
        self.complete = true;

        match self.shape.as_ref()? {
            CallShape::Execute => match &self.language {
                Some(language) => Some(StructuredCall::Execute(ExecutePayload {
                    language: language.clone(),
                    code: self.emitted_code.clone(),
                })),
                None => {
                    debug!("Response ended before the execute call named a language");
                    None
                }
            },
            CallShape::Qa => {
                if self.qa.is_none() {
                    warn!("Response ended with a pending qa call, the model never sent 'finished'");
                }
                self.qa.clone().map(StructuredCall::Qa)
            }
            CallShape::Unknown(name) => self.language.as_ref().map(|_| StructuredCall::Unknown {
                name: name.clone(),
                raw: self.emitted_code.clone(),
            }),
        }
    }

    fn identify_call(&self) -> Option<CallShape> {
        let function_call = self.function_call()?;
        let name = function_call.get("name")?.as_str()?;

        match name {
            EXECUTE_FUNCTION => Some(CallShape::Execute),
            QA_FUNCTION => Some(CallShape::Qa),
            // The name may still be arriving in pieces until arguments start
            _ if !name.is_empty() && function_call.contains_key("arguments") => {
                warn!("Model called unknown function '{}', streaming it as code", name);
                Some(CallShape::Unknown(name.to_string()))
            }
            _ => None,
        }
    }

    fn parsed_arguments(&self) -> Option<Map<String, Value>> {
        match parse_partial_json(self.arguments()?)? {
            Value::Object(map) => Some(map),
            other => {
                trace!("Arguments are not an object yet: {}", other);
                None
            }
        }
    }

    fn advance_execute(&mut self, events: &mut Vec<SemanticEvent>) {
        let Some(arguments) = self.parsed_arguments() else {
            return;
        };

        if self.language.is_none() {
            // `code` follows `language`, so its key proves the language value is complete
            let language = arguments.get("language").and_then(Value::as_str);
            match language {
                Some(language) if !language.is_empty() && arguments.contains_key("code") => {
                    events.push(SemanticEvent::Language(language.to_string()));
                    self.language = Some(language.to_string());
                }
                _ => return,
            }
        }

        if let Some(code) = arguments.get("code").and_then(Value::as_str) {
            self.emit_code(code, events);
        }
    }

    fn advance_qa(&mut self, events: &mut Vec<SemanticEvent>) {
        if self.qa.is_some() {
            return;
        }
        let Some(arguments) = self.parsed_arguments() else {
            return;
        };
        if !arguments.contains_key("finished") {
            return;
        }

        let field = |key: &str| match arguments.get(key).and_then(Value::as_str) {
            Some(value) => value.to_string(),
            None => {
                warn!("qa call finished without '{}'", key);
                String::new()
            }
        };
        let payload = QaPayload::new(field("category"), field("question"));

        events.push(SemanticEvent::Category(payload.category.clone()));
        events.push(SemanticEvent::Question(payload.question.clone()));
        events.push(SemanticEvent::Finished);
        self.qa = Some(payload);
    }

    fn advance_unknown(&mut self, name: &str, events: &mut Vec<SemanticEvent>) {
        let Some(raw) = self.arguments().map(str::to_string) else {
            return;
        };

        if self.language.is_none() {
            if raw.is_empty() {
                return;
            }
            events.push(SemanticEvent::Language(name.to_string()));
            self.language = Some(name.to_string());
        }

        self.emit_code(&raw, events);
    }

    fn emit_code(&mut self, code: &str, events: &mut Vec<SemanticEvent>) {
        let appended = match code.strip_prefix(self.emitted_code.as_str()) {
            Some(appended) => appended,
            None => {
                warn!("Code no longer extends the code already emitted");
                code.get(self.emitted_code.len()..).unwrap_or_default()
            }
        };

        if !appended.is_empty() {
            events.push(SemanticEvent::Code(appended.to_string()));
        }
        self.emitted_code = code.to_string();
    }
}
