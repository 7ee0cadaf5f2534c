use crate::streaming::{ExecutePayload, QaPayload, StructuredCall};
use serde::{Deserialize, Serialize};

/// Who produced a turn of the conversation
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    FunctionResult,
}

/// One entry of the conversation history.
///
/// A turn carries at most one request: either code to execute or a domain
/// question. The builders keep it that way.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Output of running `code`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Answer to `question`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_answer: Option<String>,
}

/// The request a turn carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRequest<'a> {
    Execute { language: &'a str, code: &'a str },
    Qa { category: &'a str, question: &'a str },
}

impl ChatTurn {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            message: None,
            language: None,
            code: None,
            output: None,
            category: None,
            question: None,
            qa_answer: None,
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(Role::User).with_message(message)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_execution(mut self, language: impl Into<String>, code: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self.code = Some(code.into());
        self.category = None;
        self.question = None;
        self.qa_answer = None;
        self
    }

    pub fn with_qa(mut self, category: impl Into<String>, question: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self.question = Some(question.into());
        self.language = None;
        self.code = None;
        self.output = None;
        self
    }

    /// Attach the call decoded from a response
    pub fn with_call(self, call: &StructuredCall) -> Self {
        match call {
            StructuredCall::Execute(ExecutePayload { language, code }) => {
                self.with_execution(language, code)
            }
            StructuredCall::Unknown { name, raw } => self.with_execution(name, raw),
            StructuredCall::Qa(QaPayload {
                category, question, ..
            }) => self.with_qa(category, question),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_qa_answer(mut self, answer: impl Into<String>) -> Self {
        self.qa_answer = Some(answer.into());
        self
    }

    /// The request this turn carries. Execution wins if a deserialized turn has both.
    pub fn request(&self) -> Option<TurnRequest<'_>> {
        if let (Some(language), Some(code)) = (&self.language, &self.code) {
            return Some(TurnRequest::Execute { language, code });
        }
        if let (Some(category), Some(question)) = (&self.category, &self.question) {
            return Some(TurnRequest::Qa { category, question });
        }
        None
    }
}
